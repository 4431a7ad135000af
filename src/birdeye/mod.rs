pub mod data_client;
pub mod throttle;
pub mod types;

pub use data_client::BirdeyeClient;
pub use throttle::RequestThrottle;
