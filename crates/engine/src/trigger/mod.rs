mod eval;
mod evaluator;
mod state;
mod window;

pub use eval::TriggerEval;
pub use evaluator::{spawn_instance, InstanceDeps, InstanceHandle};
pub use state::InstanceState;
pub use window::RequestWindow;
