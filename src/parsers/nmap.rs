//! nmap XML output parsing

use super::{ParseError, ParseResult};
use serde::Deserialize;
use std::path::Path;

/// Hosts reporting more open ports than this are treated as likely firewall
/// or CDN artifacts rather than genuinely open services.
const FALSE_POSITIVE_PORT_THRESHOLD: usize = 20;

/// One scanned host with its user-supplied hostnames and open ports.
#[derive(Debug, Clone)]
pub struct NmapHost {
    pub addresses: Vec<String>,
    /// Hostnames of attribute `type="user"`, i.e. the names the scan was
    /// asked about rather than reverse-DNS results.
    pub user_hostnames: Vec<String>,
    pub open_ports: Vec<NmapPort>,
    pub likely_false_positive: bool,
}

#[derive(Debug, Clone)]
pub struct NmapPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
}

impl NmapPort {
    /// Render as `"<port>/<proto> (<service>)"`.
    pub fn describe(&self) -> String {
        format!("{}/{} ({})", self.port, self.protocol, self.service)
    }
}

// Wire shapes for quick-xml's serde mode; attributes carry an `@` prefix.

#[derive(Debug, Deserialize)]
struct XmlRun {
    #[serde(rename = "host", default)]
    hosts: Vec<XmlHost>,
}

#[derive(Debug, Deserialize)]
struct XmlHost {
    #[serde(rename = "address", default)]
    addresses: Vec<XmlAddress>,
    #[serde(default)]
    hostnames: XmlHostnames,
    #[serde(default)]
    ports: XmlPorts,
}

#[derive(Debug, Deserialize)]
struct XmlAddress {
    #[serde(rename = "@addr")]
    addr: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlHostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<XmlHostname>,
}

#[derive(Debug, Deserialize)]
struct XmlHostname {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type", default)]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlPorts {
    #[serde(rename = "port", default)]
    ports: Vec<XmlPort>,
}

#[derive(Debug, Deserialize)]
struct XmlPort {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    state: XmlPortState,
    service: Option<XmlService>,
}

#[derive(Debug, Deserialize)]
struct XmlPortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct XmlService {
    #[serde(rename = "@name")]
    name: String,
}

/// Parse `nmap_output.xml`, keeping only hosts that carry at least one
/// user hostname and only ports in state `open`.
pub fn parse_nmap(path: &Path) -> ParseResult<Vec<NmapHost>> {
    let raw = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let run: XmlRun = quick_xml::de::from_str(&raw).map_err(|e| ParseError::Xml {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut hosts = Vec::new();
    for host in run.hosts {
        let user_hostnames: Vec<String> = host
            .hostnames
            .hostnames
            .into_iter()
            .filter(|h| h.kind == "user")
            .map(|h| h.name)
            .collect();
        if user_hostnames.is_empty() {
            continue;
        }

        let open_ports: Vec<NmapPort> = host
            .ports
            .ports
            .into_iter()
            .filter(|p| p.state.state == "open")
            .map(|p| NmapPort {
                port: p.portid,
                protocol: p.protocol,
                service: p.service.map(|s| s.name).unwrap_or_else(|| "unknown".to_string()),
            })
            .collect();

        let likely_false_positive = open_ports.len() > FALSE_POSITIVE_PORT_THRESHOLD;
        hosts.push(NmapHost {
            addresses: host.addresses.into_iter().map(|a| a.addr).collect(),
            user_hostnames,
            open_ports,
            likely_false_positive,
        });
    }

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_xml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <address addr="93.184.216.34" addrtype="ipv4"/>
    <hostnames>
      <hostname name="www.example.com" type="user"/>
      <hostname name="edge.example.net" type="PTR"/>
    </hostnames>
    <ports>
      <port protocol="tcp" portid="80"><state state="open"/><service name="http"/></port>
      <port protocol="tcp" portid="443"><state state="open"/><service name="https"/></port>
      <port protocol="tcp" portid="8080"><state state="filtered"/><service name="http-proxy"/></port>
    </ports>
  </host>
  <host>
    <address addr="10.0.0.1" addrtype="ipv4"/>
    <hostnames>
      <hostname name="gw.internal" type="PTR"/>
    </hostnames>
    <ports/>
  </host>
</nmaprun>"#;

    #[test]
    fn parses_user_hosts_and_open_ports() {
        let file = write_xml(SAMPLE);
        let hosts = parse_nmap(file.path()).unwrap();

        // The PTR-only host is dropped.
        assert_eq!(hosts.len(), 1);
        let host = &hosts[0];
        assert_eq!(host.user_hostnames, vec!["www.example.com"]);
        assert_eq!(host.open_ports.len(), 2);
        assert_eq!(host.open_ports[0].describe(), "80/tcp (http)");
        assert!(!host.likely_false_positive);
    }

    #[test]
    fn flags_port_flood_as_false_positive() {
        let ports: String = (1000..1025)
            .map(|p| {
                format!(
                    r#"<port protocol="tcp" portid="{p}"><state state="open"/><service name="unknown"/></port>"#
                )
            })
            .collect();
        let xml = format!(
            r#"<nmaprun><host><address addr="1.2.3.4" addrtype="ipv4"/><hostnames><hostname name="a.example.com" type="user"/></hostnames><ports>{ports}</ports></host></nmaprun>"#
        );
        let file = write_xml(&xml);

        let hosts = parse_nmap(file.path()).unwrap();
        assert_eq!(hosts[0].open_ports.len(), 25);
        assert!(hosts[0].likely_false_positive);
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let file = write_xml("<nmaprun><host></nmaprun>");
        assert!(matches!(
            parse_nmap(file.path()),
            Err(ParseError::Xml { .. })
        ));
    }
}
