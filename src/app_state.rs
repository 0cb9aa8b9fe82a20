use crate::config::Config;
use crate::db::MongoDB;
use crate::notifier::Notifier;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub notifier: Addr<Notifier>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
}
