//! Output core: backend traits, device lifecycle, the background write
//! worker and progress accounting.

pub mod backend;
pub mod core;
pub mod encoding;
pub mod progress;
pub mod scheduler;

pub use backend::{
    create_module, BackendError, BackendKind, ModuleInfo, NullModule, OutputBackend,
    OutputModule, OutputParams, StubTimeSource, SystemTimeSource, TimeSource, WavModule,
};
pub use core::{LifecycleState, OpenRequest, OutputDevice};
pub use encoding::{Encoding, EncodingSet};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use scheduler::{PendingWrite, WriteCompletion, WriteRequest};
