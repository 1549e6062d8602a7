pub mod models;
pub mod store;

pub mod queries {
    pub mod deliveries;
    pub mod webhooks;
}

pub use store::memory::MemoryDeliveryStore;
pub use store::postgres::PgDeliveryStore;
pub use store::{DeliveryStore, StoreError, StoreResult};
