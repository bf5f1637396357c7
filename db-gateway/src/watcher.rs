//! Wires the generic label-selector watcher to the in-process username routing table,
//! the same way `web-gateway::watcher` wires it to the domain routing table.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use orchestrator::watch::{watch_label_selector, RoutingEvent, WatchError};
use tokio_util::sync::CancellationToken;

use crate::routing::RoutingTable;

pub async fn run(client: Client, label_selector: String, table: Arc<RoutingTable>, cancel: CancellationToken) -> Result<(), WatchError> {
    let api: Api<Service> = Api::all(client);
    watch_label_selector(api, label_selector, cancel, move |event| match event {
        RoutingEvent::Upsert(svc) => table.upsert(&svc),
        RoutingEvent::Remove(svc) => table.remove(&svc),
    })
    .await
}
