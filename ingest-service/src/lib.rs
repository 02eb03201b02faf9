pub mod clock;
pub mod ingest;
pub mod shutdown;

pub use clock::{Clock, SystemClock};
pub use ingest::{IngestLoop, IngestStats};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
