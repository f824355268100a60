pub mod dispatch;
pub mod latest;
pub mod results;
