//! wg-quick configuration rendering
//!
//! Turns a compiled [`PeerPolicy`] into the INI-style file consumed by
//! `wg-quick`. Used for RegularStatic peers, which are configured once and
//! never talk to an agent, and by the `compile` CLI command.

use crate::policy::PeerPolicy;
use crate::wireguard::PrivateKey;
use ipnet::IpNet;

/// Render a wg-quick configuration
///
/// Without a private key the `PrivateKey` line is left as a placeholder for
/// the operator to fill in.
pub fn render_wg_quick(policy: &PeerPolicy, private_key: Option<&PrivateKey>) -> String {
    let mut wg_config = String::new();

    wg_config.push_str(&format!("# {} ({})\n", policy.name, policy.domain));
    wg_config.push_str(&format!("# version {}\n", policy.version));
    wg_config.push_str("[Interface]\n");
    wg_config.push_str(&format!("Address = {}/32\n", policy.address));
    match private_key {
        Some(key) => wg_config.push_str(&format!("PrivateKey = {}\n", key.to_base64())),
        None => wg_config.push_str("PrivateKey = <private key>\n"),
    }
    if let Some(port) = policy.listen_port {
        wg_config.push_str(&format!("ListenPort = {}\n", port));
    }
    wg_config.push('\n');

    for remote in &policy.remotes {
        wg_config.push_str("[Peer]\n");
        wg_config.push_str(&format!("# {}\n", remote.name));
        wg_config.push_str(&format!("PublicKey = {}\n", remote.public_key.to_base64()));

        if let Some(endpoint) = &remote.endpoint {
            wg_config.push_str(&format!("Endpoint = {}\n", endpoint));
        }

        if !remote.allowed_ips.is_empty() {
            wg_config.push_str(&format!("AllowedIPs = {}\n", join(&remote.allowed_ips)));
        }

        if let Some(interval) = remote.persistent_keepalive {
            wg_config.push_str(&format!("PersistentKeepalive = {}\n", interval));
        }

        wg_config.push('\n');
    }

    wg_config
}

fn join(nets: &[IpNet]) -> String {
    nets.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
