//! Command handler for control API
//!
//! This module executes API commands by dispatching them to the mesh
//! registry. Each mutating action runs in its own network transaction.

use crate::control::api::{
    CidrParams, ControlAction, DomainParams, IncidentParams, PeerParams, ResolveParams,
    TokenParams, UpdatePeerParams,
};
use crate::control::{ApiError, ApiRequest, ApiResponse};
use crate::model::NetworkId;
use crate::notify::Subscription;
use crate::registry::{Mesh, NetworkSpec, NetworkTxn, PeerSpec};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type HandlerResult = Result<Option<serde_json::Value>, ApiError>;

/// Command handler executing API commands against a mesh
pub struct CommandHandler {
    mesh: Arc<Mesh>,
}

impl CommandHandler {
    /// Create a new command handler
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self { mesh }
    }

    /// Handle an API request
    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        debug!(
            "Handling request {}: {:?} for network {:?}",
            request.id, request.action, request.network
        );

        let result = match request.action {
            ControlAction::ListNetworks => to_data(&self.mesh.list_networks()),
            ControlAction::CreateNetwork => self.handle_create_network(&request).await,
            ControlAction::DeleteNetwork => self.handle_delete_network(&request).await,
            ControlAction::UpdateCidr => self.handle_update_cidr(&request).await,
            ControlAction::UpdateDomain => self.handle_update_domain(&request).await,
            ControlAction::ShowPolicy => self.handle_show_policy(&request),
            ControlAction::CreatePeer => self.handle_create_peer(&request).await,
            ControlAction::UpdatePeer => self.handle_update_peer(&request).await,
            ControlAction::DeletePeer => self.handle_delete_peer(&request).await,
            ControlAction::OpenIncident => self.handle_open_incident(&request).await,
            ControlAction::ResolveIncident => self.handle_resolve_incident(&request).await,
            ControlAction::FetchConfig => self.handle_fetch_config(&request).await,
            ControlAction::FetchJumpPolicy => self.handle_fetch_jump_policy(&request).await,
            ControlAction::Status => self.handle_status(),
            ControlAction::Subscribe => Err(ApiError::InvalidState(
                "subscribe is only available on a control socket connection".to_string(),
            )),
        };

        match result {
            Ok(data) => {
                info!(
                    "Request {} completed successfully: {:?}",
                    request.id, request.action
                );
                ApiResponse::success(request.id, data)
            }
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                ApiResponse::error(request.id, e)
            }
        }
    }

    /// Open a change subscription for the request's network
    pub fn subscribe(&self, request: &ApiRequest) -> Result<Subscription, ApiError> {
        let network_id = self.network_id(request)?;
        Ok(self.mesh.subscribe(&network_id)?)
    }

    fn network_id(&self, request: &ApiRequest) -> Result<NetworkId, ApiError> {
        Ok(self.mesh.resolve(request.network()?)?)
    }

    async fn begin(&self, request: &ApiRequest) -> Result<NetworkTxn<'_>, ApiError> {
        let network_id = self.network_id(request)?;
        Ok(self.mesh.begin(&network_id).await?)
    }

    async fn handle_create_network(&self, request: &ApiRequest) -> HandlerResult {
        let spec: NetworkSpec = request.params()?;
        let id = self.mesh.create_network(spec).await?;
        Ok(Some(serde_json::json!({ "network_id": id })))
    }

    async fn handle_delete_network(&self, request: &ApiRequest) -> HandlerResult {
        let network_id = self.network_id(request)?;
        self.mesh.delete_network(&network_id).await?;
        Ok(None)
    }

    async fn handle_update_cidr(&self, request: &ApiRequest) -> HandlerResult {
        let params: CidrParams = request.params()?;
        let mut txn = self.begin(request).await?;
        txn.update_cidr(&params.cidr)?;
        to_data(&txn.commit().await?)
    }

    async fn handle_update_domain(&self, request: &ApiRequest) -> HandlerResult {
        let params: DomainParams = request.params()?;
        let mut txn = self.begin(request).await?;
        txn.update_domain(&params.domain)?;
        to_data(&txn.commit().await?)
    }

    fn handle_show_policy(&self, request: &ApiRequest) -> HandlerResult {
        let network_id = self.network_id(request)?;
        to_data(self.mesh.compiled(&network_id)?.as_ref())
    }

    async fn handle_create_peer(&self, request: &ApiRequest) -> HandlerResult {
        let spec: PeerSpec = request.params()?;
        let network_id = self.network_id(request)?;

        let mut txn = self.mesh.begin(&network_id).await?;
        let created = txn.create_peer(spec)?;
        let is_static = txn
            .record()
            .peers
            .get(&created.peer_id)
            .is_some_and(|p| p.kind.is_static());
        let receipt = txn.commit().await?;

        let mut data = serde_json::json!({
            "peer": created,
            "commit": receipt,
        });
        // The peer is committed and its key is only returned here, so a
        // missing config must not turn the response into an error
        if is_static {
            let rendered = match &receipt.policy_error {
                Some(e) => Err(e.clone()),
                None => self
                    .mesh
                    .render_config(&network_id, &created.peer_id, created.private_key.as_ref())
                    .map_err(|e| e.to_string()),
            };
            match rendered {
                Ok(config) => data["wg_quick"] = serde_json::Value::String(config),
                Err(e) => warn!("No wg-quick file for static peer {} yet: {}", created.peer_id, e),
            }
        }
        Ok(Some(data))
    }

    async fn handle_update_peer(&self, request: &ApiRequest) -> HandlerResult {
        let params: UpdatePeerParams = request.params()?;
        let mut txn = self.begin(request).await?;
        txn.update_peer(&params.peer_id, params.update)?;
        to_data(&txn.commit().await?)
    }

    async fn handle_delete_peer(&self, request: &ApiRequest) -> HandlerResult {
        let params: PeerParams = request.params()?;
        let mut txn = self.begin(request).await?;
        txn.delete_peer(&params.peer_id)?;
        to_data(&txn.commit().await?)
    }

    async fn handle_open_incident(&self, request: &ApiRequest) -> HandlerResult {
        let params: IncidentParams = request.params()?;
        let mut txn = self.begin(request).await?;
        let incident_id = txn.open_incident(
            params.peers.into_iter().collect(),
            params.reason,
            params.action,
            params.note,
        )?;
        let receipt = txn.commit().await?;
        Ok(Some(serde_json::json!({
            "incident_id": incident_id,
            "commit": receipt,
        })))
    }

    async fn handle_resolve_incident(&self, request: &ApiRequest) -> HandlerResult {
        let params: ResolveParams = request.params()?;
        let mut txn = self.begin(request).await?;
        txn.resolve_incident(&params.incident_id)?;
        to_data(&txn.commit().await?)
    }

    async fn handle_fetch_config(&self, request: &ApiRequest) -> HandlerResult {
        let params: TokenParams = request.params()?;
        to_data(&self.mesh.fetch_config(&params.token).await?)
    }

    async fn handle_fetch_jump_policy(&self, request: &ApiRequest) -> HandlerResult {
        let params: TokenParams = request.params()?;
        to_data(&self.mesh.fetch_jump_policy(&params.token).await?)
    }

    fn handle_status(&self) -> HandlerResult {
        let monitor = self.mesh.monitor();
        Ok(Some(serde_json::json!({
            "version": crate::VERSION,
            "networks": monitor.get_all_stats(),
            "metrics": monitor.metrics().export_json(),
        })))
    }
}

fn to_data<T: Serialize + ?Sized>(value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| ApiError::SerializationError(e.to_string()))
}
