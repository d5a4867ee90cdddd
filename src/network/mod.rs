pub mod connectivity;

pub use connectivity::{ConnectivityMonitor, ConnectivitySource, ConnectivityWatch};
