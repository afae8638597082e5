pub mod codec;
pub mod layout;
pub mod lock;
pub mod pattern_store;
pub mod recovery;
pub mod retry;
pub mod session_store;

pub use codec::{encode_frame, scan_frames, FrameScan, ScanStop, FRAME_HEADER_LEN};
pub use layout::Layout;
pub use lock::{FifoGuard, FifoMutex};
pub use pattern_store::{MergeReport, PatternStore};
pub use recovery::{RecoveryReport, RecoveryScanner};
pub use retry::RetryPolicy;
pub use session_store::SessionStore;
