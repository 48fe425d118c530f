pub mod interaction;
pub mod session;

pub use interaction::{InteractionEvent, InteractionType};
pub use session::{DeviceContext, Dimensions, Session};
