//! Subprocess wrappers for the external telemetry tools.
//!
//! Everything here turns tool output into the decoded record types; the
//! merge rules live in the importers. A failed invocation is an error the
//! caller can log and continue past, so one dead source never kills the
//! whole cycle.

use crate::mac::MacAddress;
use crate::models::{AliasRecord, NodeInfo, NodeInfoRecord, StatisticsRecord, VisRecord};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("undecodable output from {command}: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type CollectResult<T> = Result<T, CollectError>;

fn run(program: &str, args: &[&str]) -> CollectResult<String> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| CollectError::Spawn { command: command.clone(), source })?;
    if !output.status.success() {
        return Err(CollectError::Failed { command, status: output.status });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Gateway announcement mode of the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    Server { bandwidth: Option<String> },
    Client,
    Off,
}

/// Wrapper around the B.A.T.M.A.N. advanced userspace tools for one mesh
/// interface.
pub struct Batctl {
    mesh_interface: String,
}

impl Batctl {
    pub fn new(mesh_interface: impl Into<String>) -> Self {
        Self { mesh_interface: mesh_interface.into() }
    }

    /// Fetch and decode the neighbor snapshot (`batadv-vis`, one JSON
    /// object per line). Undecodable lines are skipped.
    pub fn vis_data(&self) -> CollectResult<Vec<VisRecord>> {
        let output = run("batadv-vis", &["-i", &self.mesh_interface, "-f", "json"])?;
        Ok(parse_vis_lines(&output))
    }

    /// Fetch the gateway list. When the local node itself announces as a
    /// gateway server, its own address joins the list.
    pub fn gateway_list(&self) -> CollectResult<Vec<MacAddress>> {
        let output = run("batctl", &["-m", &self.mesh_interface, "gwl", "-n"])?;
        let mut rows = output.lines();
        let header = rows.next().unwrap_or_default();

        let mut gateways = Vec::new();
        if let GatewayMode::Server { .. } = self.gateway_mode()? {
            if let Some(own) = first_mac_token(header) {
                gateways.push(own);
            }
        }
        for row in rows {
            if let Some(mac) = first_mac_token(row) {
                gateways.push(mac);
            }
        }
        Ok(gateways)
    }

    pub fn gateway_mode(&self) -> CollectResult<GatewayMode> {
        let output = run("batctl", &["-m", &self.mesh_interface, "gw"])?;
        let mut chunks = output.split_whitespace();
        match chunks.next() {
            Some("server") => Ok(GatewayMode::Server { bandwidth: chunks.nth(2).map(str::to_string) }),
            Some("client") => Ok(GatewayMode::Client),
            _ => Ok(GatewayMode::Off),
        }
    }
}

/// Wrapper around `alfred-json` for the distributed node self-description
/// tables. Statistics are served on the request type following the
/// node-info one.
pub struct Alfred {
    request_type: u16,
}

impl Alfred {
    pub fn new(request_type: u16) -> Self {
        Self { request_type }
    }

    fn request(&self, request_type: u16) -> CollectResult<Vec<(MacAddress, Value)>> {
        let type_arg = request_type.to_string();
        let command = format!("alfred-json -r {request_type}");
        let output = run("alfred-json", &["-z", "-r", &type_arg, "-f", "json"])?;
        let documents: BTreeMap<String, Value> = serde_json::from_str(&output)
            .map_err(|source| CollectError::Decode { command, source })?;

        Ok(documents
            .into_iter()
            .filter_map(|(key, doc)| match key.parse::<MacAddress>() {
                Ok(mac) => Some((mac, doc)),
                Err(err) => {
                    warn!("skipping alfred entry with unusable key {key:?}: {err}");
                    None
                }
            })
            .collect())
    }

    pub fn nodeinfo(&self) -> CollectResult<Vec<NodeInfoRecord>> {
        let documents = self.request(self.request_type)?;
        Ok(documents
            .into_iter()
            .filter_map(|(mac, doc)| match serde_json::from_value::<NodeInfo>(doc) {
                Ok(info) => Some(NodeInfoRecord { node_id: mac, info }),
                Err(err) => {
                    warn!("skipping undecodable node-info for {mac}: {err}");
                    None
                }
            })
            .collect())
    }

    pub fn statistics(&self) -> CollectResult<Vec<StatisticsRecord>> {
        let documents = self.request(self.request_type + 1)?;
        Ok(documents
            .into_iter()
            .map(|(mac, data)| StatisticsRecord { node_id: mac, data })
            .collect())
    }
}

/// Read a static alias file: a JSON document keyed by MAC address.
pub fn read_alias_file(path: &Path) -> CollectResult<BTreeMap<MacAddress, AliasRecord>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| CollectError::ReadFile { path: path.to_path_buf(), source })?;
    let records: BTreeMap<String, AliasRecord> = serde_json::from_str(&contents)
        .map_err(|source| CollectError::ParseFile { path: path.to_path_buf(), source })?;

    Ok(records
        .into_iter()
        .filter_map(|(key, record)| match key.parse::<MacAddress>() {
            Ok(mac) => Some((mac, record)),
            Err(err) => {
                warn!("skipping alias entry with unusable key {key:?}: {err}");
                None
            }
        })
        .collect())
}

/// One line of vis output, before classification.
#[derive(Debug, Default, Deserialize)]
struct VisWire {
    primary: Option<MacAddress>,
    secondary: Option<MacAddress>,
    of: Option<MacAddress>,
    router: Option<MacAddress>,
    neighbor: Option<MacAddress>,
    gateway: Option<MacAddress>,
    label: Option<String>,
    metric: Option<String>,
}

fn parse_vis_lines(output: &str) -> Vec<VisRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| match serde_json::from_str::<VisWire>(line) {
            Ok(wire) => classify(wire),
            Err(err) => {
                debug!("skipping undecodable vis line: {err}");
                Vec::new()
            }
        })
        .collect()
}

/// Turn one wire entry into its semantic records. An entry can declare a
/// primary interface and a secondary pairing at once; edge entries carry
/// their quality either in `metric` or, on older tools, directly in
/// `label`.
fn classify(wire: VisWire) -> Vec<VisRecord> {
    let mut records = Vec::new();

    if let Some(primary) = wire.primary {
        records.push(VisRecord::Primary { primary });
    }
    if let Some(secondary) = wire.secondary {
        if let Some(of) = wire.of.or(wire.primary) {
            records.push(VisRecord::Secondary { secondary, of });
        }
    }

    if let Some(router) = wire.router {
        if wire.label.as_deref() == Some("TT") {
            if let Some(client) = wire.gateway.or(wire.neighbor) {
                records.push(VisRecord::Client { router, client });
            }
        } else if let Some(neighbor) = wire.neighbor.or(wire.gateway) {
            let quality = wire
                .metric
                .as_deref()
                .and_then(|metric| metric.parse().ok())
                .or_else(|| wire.label.as_deref().and_then(|label| label.parse().ok()));
            match quality {
                Some(quality) => records.push(VisRecord::Neighbor { router, neighbor, quality }),
                None => debug!("vis entry for {router} has no usable metric"),
            }
        }
    }
    records
}

fn first_mac_token(line: &str) -> Option<MacAddress> {
    line.split(|c: char| c.is_whitespace() || c == '/' || c == '(' || c == ')' || c == ',')
        .find_map(|token| token.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_vis_lines_mixed_snapshot() {
        let output = concat!(
            "{\"primary\": \"aa:00:00:00:00:11\"}\n",
            "{\"secondary\": \"aa:00:00:00:00:12\", \"of\": \"aa:00:00:00:00:11\"}\n",
            "{\"router\": \"aa:00:00:00:00:11\", \"neighbor\": \"bb:00:00:00:00:21\", \"label\": \"TQ\", \"metric\": \"200\"}\n",
            "{\"router\": \"aa:00:00:00:00:11\", \"gateway\": \"ee:ee:ee:00:00:01\", \"label\": \"TT\"}\n",
            "not json at all\n",
            "\n",
        );
        let records = parse_vis_lines(output);

        assert_eq!(records.len(), 4);
        assert_eq!(records[0], VisRecord::Primary { primary: mac("aa:00:00:00:00:11") });
        assert_eq!(
            records[1],
            VisRecord::Secondary { secondary: mac("aa:00:00:00:00:12"), of: mac("aa:00:00:00:00:11") }
        );
        assert_eq!(
            records[2],
            VisRecord::Neighbor {
                router: mac("aa:00:00:00:00:11"),
                neighbor: mac("bb:00:00:00:00:21"),
                quality: 200.0
            }
        );
        assert_eq!(
            records[3],
            VisRecord::Client { router: mac("aa:00:00:00:00:11"), client: mac("ee:ee:ee:00:00:01") }
        );
    }

    #[test]
    fn test_classify_takes_quality_from_label_on_older_tools() {
        let records = parse_vis_lines(
            "{\"router\": \"aa:00:00:00:00:11\", \"neighbor\": \"bb:00:00:00:00:21\", \"label\": \"1.000\"}\n",
        );
        assert_eq!(
            records,
            vec![VisRecord::Neighbor {
                router: mac("aa:00:00:00:00:11"),
                neighbor: mac("bb:00:00:00:00:21"),
                quality: 1.0
            }]
        );
    }

    #[test]
    fn test_classify_drops_edge_without_metric() {
        let records = parse_vis_lines(
            "{\"router\": \"aa:00:00:00:00:11\", \"neighbor\": \"bb:00:00:00:00:21\", \"label\": \"TQ\"}\n",
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_combined_interface_entry_yields_both_records() {
        let records = parse_vis_lines(
            "{\"primary\": \"aa:00:00:00:00:11\", \"secondary\": \"aa:00:00:00:00:12\", \"of\": \"aa:00:00:00:00:11\"}\n",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], VisRecord::Primary { primary: mac("aa:00:00:00:00:11") });
        assert_eq!(
            records[1],
            VisRecord::Secondary { secondary: mac("aa:00:00:00:00:12"), of: mac("aa:00:00:00:00:11") }
        );
    }

    #[test]
    fn test_first_mac_token_scans_past_decorations() {
        assert_eq!(
            first_mac_token("=> 12:34:56:78:9a:bc (255) [  eth0]"),
            Some(mac("12:34:56:78:9a:bc"))
        );
        assert_eq!(
            first_mac_token("Gateway      (#/255)           Nexthop [outgoingIF]"),
            None
        );
        assert_eq!(
            first_mac_token("B.A.T.M.A.N. adv 2013.4.0, MainIF/MAC: eth0/de:ad:be:ef:01:02"),
            Some(mac("de:ad:be:ef:01:02"))
        );
    }

    #[test]
    fn test_read_alias_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(
            &path,
            r#"{"00:00:00:00:00:01": {"name": "rooftop", "vpn": true},
               "not-a-mac": {"name": "ignored"}}"#,
        )
        .unwrap();

        let aliases = read_alias_file(&path).unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[&mac("00:00:00:00:00:01")].name.as_deref(), Some("rooftop"));
        assert_eq!(aliases[&mac("00:00:00:00:00:01")].vpn, Some(true));
    }

    #[test]
    fn test_missing_alias_file_is_an_error() {
        let err = read_alias_file(Path::new("/nonexistent/aliases.json")).unwrap_err();
        assert!(matches!(err, CollectError::ReadFile { .. }));
    }
}
