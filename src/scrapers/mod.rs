pub mod browser;
pub mod session;
pub mod traits;
pub mod types;

pub use browser::ChromeDriver;
pub use session::NavigationSession;
pub use traits::{Navigator, PageDriver};
pub use types::{CookieRecord, ElementSnapshot, SessionState, WaitOutcome};
