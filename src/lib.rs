#![deny(unsafe_code)]
#![doc = "cyre: an in-process reactive channel bus."]
#![doc = ""]
#![doc = "Producers `call()` named channels; subscribers `on()` them. Between the two"]
#![doc = "sits a per-channel protection pipeline (throttle/debounce/buffer), a fixed-"]
#![doc = "order talent chain (required/schema/selector/condition/transform/"]
#![doc = "detectChanges), a timekeeper for delayed/interval/repeating work, and a"]
#![doc = "breathing monitor that feeds observed stress back into scheduling without"]
#![doc = "ever altering semantic outcomes. See `SPEC_FULL.md` for the full contract"]
#![doc = "and `DESIGN.md` for the grounding ledger."]

pub mod branch;
pub mod breathing;
pub mod channel;
pub mod common;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod metrics;
pub mod orchestration;
pub mod pipeline;
pub mod runtime;
pub mod subscriber;
pub mod time;
pub mod timekeeper;

pub use branch::{Branch, BulkCallOptions, CreateBranchOptions};
pub use channel::{ChannelConfig, ChannelSnapshot};
pub use common::{ChannelId, HandlerResult, Payload};
pub use dispatch::Response;
pub use error::CyreErrorKind;
pub use orchestration::{ChannelFireEvent, Trigger};
pub use runtime::{ActionResult, Cyre, InitResult, OnResult};
