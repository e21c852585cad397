//! Host-agnostic drawing client: stroke capture, local history, the
//! whiteboard state machine and gateways to the relay and snapshot store.

pub mod board;
pub mod capture;
pub mod error;
pub mod history;
pub mod snapshots;
pub mod surface;
pub mod transport;

pub use board::{Update, Whiteboard};
pub use capture::{StrokeCapture, Viewport};
pub use error::{RasterError, SnapshotError, TransportError};
pub use history::{History, HistoryEntry};
pub use snapshots::SnapshotGateway;
pub use surface::{Brush, MemorySurface, Raster, Surface};
pub use transport::{ClientOptions, SyncClient};
