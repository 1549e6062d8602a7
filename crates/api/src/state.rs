use quill_core::config::Settings;
use quill_db::DeliveryStore;
use quill_dispatcher::{ClientError, Dispatcher};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DeliveryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn DeliveryStore>, settings: Settings) -> Result<Self, ClientError> {
        let dispatcher = Dispatcher::from_settings(store.clone(), &settings.dispatch)?;
        Ok(Self {
            store,
            dispatcher: Arc::new(dispatcher),
            settings: Arc::new(settings),
        })
    }
}

/// Set on every request by the request id middleware.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);
