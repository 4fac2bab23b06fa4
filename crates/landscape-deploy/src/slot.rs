//! Port and directory allocation on multi-process hosts.

use landscape_core::{
    ApplicationConfiguration, Host, LandscapeError, LandscapeResult, PortsConfig, ProcessSlot,
};

/// Picks the slot a new process of `configuration` takes on `host`.
///
/// A fixed port must be free; otherwise the lowest free port of the
/// configured range is used. The directory is derived from the server name.
pub fn allocate_slot(
    host: &Host,
    configuration: &ApplicationConfiguration,
    ports: &PortsConfig,
) -> LandscapeResult<ProcessSlot> {
    let directory = ports.server_directory(&configuration.server_name);
    if host.directory_in_use(&directory) {
        return Err(LandscapeError::Provisioning(format!(
            "directory {directory} already in use on host {}",
            host.id
        )));
    }

    let port = match configuration.port {
        Some(port) if host.port_in_use(port) => {
            return Err(LandscapeError::Provisioning(format!(
                "port {port} already in use on host {}",
                host.id
            )));
        }
        Some(port) => port,
        None => (ports.first_port..=ports.last_port)
            .find(|p| !host.port_in_use(*p))
            .ok_or_else(|| {
                LandscapeError::Provisioning(format!(
                    "no free port in {}..={} on host {}",
                    ports.first_port, ports.last_port, host.id
                ))
            })?,
    };

    Ok(ProcessSlot {
        port,
        directory,
        server_name: configuration.server_name.clone(),
    })
}
