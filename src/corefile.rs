//! Directive file for the DNS responder daemon.
//!
//! The configured domains get their own server block that consults the
//! optional hosts file first and forwards the rest to the local answer
//! listener. Everything else goes to `responder.forward_to`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::error::Result;

/// Render the directive file.
pub fn render(config: &Config) -> String {
    let upstream = local_upstream(config.dns.listen_addr);

    let mut lines = vec![format!("{} {{", config.dns.domains.join(" "))];
    if let Some(ref hosts) = config.responder.hosts_file {
        lines.push(format!("    hosts {} {{", hosts.display()));
        lines.push("        fallthrough".to_string());
        lines.push("    }".to_string());
    }
    lines.push(format!("    forward . {upstream}"));
    lines.push("    log".to_string());
    lines.push("    errors".to_string());
    lines.push("}".to_string());

    lines.push(String::new());
    lines.push(". {".to_string());
    let forward_to = config.responder.forward_to.trim();
    if !forward_to.is_empty() {
        lines.push(format!("    forward . {forward_to}"));
    }
    lines.push("    log".to_string());
    lines.push("    errors".to_string());
    lines.push("}".to_string());

    if let Some(extra) = config
        .responder
        .additional_config
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        lines.push(String::new());
        lines.push(extra.to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Directive text from `path` with blank and `#` comment lines dropped.
///
/// A missing file yields `None`.
pub async fn load_additional_config(path: &Path) -> Result<Option<String>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(filter_directives(&content))
}

fn filter_directives(content: &str) -> Option<String> {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Render and write the directive file to `responder.config_path`.
///
/// Text from `responder.additional_config_file` is appended after the
/// inline additional config.
pub async fn write(config: &Config) -> Result<()> {
    let mut content = render(config);
    if let Some(ref file) = config.responder.additional_config_file {
        if let Some(extra) = load_additional_config(file).await? {
            info!(path = %file.display(), "Including additional responder config");
            content.push('\n');
            content.push_str(&extra);
            content.push('\n');
        }
    }

    let path = &config.responder.config_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &content).await?;
    info!(path = %path.display(), "Wrote responder config");
    Ok(())
}

/// Address the responder uses to reach the local listener.
fn local_upstream(listen_addr: SocketAddr) -> SocketAddr {
    let ip = match listen_addr.ip() {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, listen_addr.port())
}
