pub mod addr;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod fs;
pub mod iter;
pub mod logging;
pub mod notation;
pub mod store;
pub mod types;

mod element;

pub use crate::addr::Addr;
pub use crate::config::MemoryParams;
pub use crate::context::{Memory, MemoryContext};
pub use crate::error::{MemoryError, Result};
pub use crate::event::{EventId, EventKind, EventNotification};
pub use crate::iter::{Triple, TripleIter};
pub use crate::store::{Stat, Store};
pub use crate::types::ElementType;
