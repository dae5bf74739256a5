// Game persistence — save files, level files, bones, and the level
// transition machinery, all driven through a GameSession.

pub mod defs;
pub mod saveload;
pub mod session;
pub mod tags;
pub mod transition;

pub use session::{GameSession, SaveConfig};
pub use transition::{enter_level, LoadMode};
