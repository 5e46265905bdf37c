pub mod dispatcher;
pub mod formatter;
pub mod router;

pub use dispatcher::{AgentOverview, DispatchError, Dispatcher, DispatcherStatistics, Introspection};
pub use formatter::ResultFormatter;
pub use router::DecisionRouter;
