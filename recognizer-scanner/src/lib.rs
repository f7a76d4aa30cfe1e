pub mod analyzers;
pub mod baseline;
pub mod error;
pub mod http_session;
pub mod links;
pub mod result;
pub mod session;
pub mod traffic;

pub use error::ScanError;
pub use http_session::{HttpSession, HttpSessionFactory};
pub use result::{Endpoint, FormOutcome, Secret, Technology};
pub use session::{BrowserSession, ObservedCall, PageContent, SessionFactory};
pub use traffic::{CapturedRequest, CapturedResponse, Header, TrafficEvent, TrafficTap};
