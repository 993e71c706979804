mod account;
mod events;
mod invoice;
mod journal;
mod money;
mod payment;
mod service;

pub use account::*;
pub use events::*;
pub use invoice::*;
pub use journal::*;
pub use money::*;
pub use payment::*;
pub use service::*;
