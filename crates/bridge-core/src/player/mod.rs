//! Action player: turns an [`ActionIntent`](crate::agent::ActionIntent) into synthetic clicks
//! and verifies the effect against the event stream.

pub mod executor;
pub mod input;
pub mod layout;
pub mod plan;
pub mod runner;

pub use executor::{Executor, ExecutorState, Outcome, RetryPolicy, Verification, verify};
pub use input::{Control, InputDispatcher, Point, UiAction, Viewport};
pub use layout::{Button, GridPoint, ScreenMapper};
pub use plan::{PlanStep, Planner, TimingConfig};
pub use runner::{Mode, Player, PlayerConfig, PlayerEvent};
