//! NetworkManager (`nmcli`) scan source for Linux hosts.

#![allow(missing_docs)]

use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::errors::{Result, WsnError};
use crate::pipeline::records::{NetworkObservation, now_seconds};
use crate::platform::pal::ScanSource;

const LIST_FIELDS: &str = "SSID,BSSID,SIGNAL,FREQ,SECURITY";

/// Longest a single `nmcli` invocation may run before it is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Drives `nmcli device wifi` for scans and `nmcli radio wifi` for the radio.
#[derive(Debug, Clone)]
pub struct NmcliScanSource {
    interface: Option<String>,
    command_timeout: Duration,
}

impl Default for NmcliScanSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NmcliScanSource {
    #[must_use]
    pub const fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new("nmcli");
        command.args(args);
        let failed = |details: String| WsnError::ScanSource {
            source_name: "nmcli",
            details,
        };
        match output_within(command, self.command_timeout) {
            Ok(Some(out)) => Ok(out),
            Ok(None) => Err(failed(format!(
                "nmcli {} killed after {}s",
                args.join(" "),
                self.command_timeout.as_secs()
            ))),
            Err(err) => Err(failed(format!("failed to run nmcli {}: {err}", args.join(" ")))),
        }
    }

    fn with_interface<'a>(&'a self, mut args: Vec<&'a str>) -> Vec<&'a str> {
        if let Some(ifname) = self.interface.as_deref() {
            args.push("ifname");
            args.push(ifname);
        }
        args
    }
}

impl ScanSource for NmcliScanSource {
    fn name(&self) -> &'static str {
        "nmcli"
    }

    fn ensure_radio_enabled(&self) -> Result<bool> {
        let status = self.run(&["radio", "wifi"])?;
        let state = String::from_utf8_lossy(&status.stdout);
        if state.trim().eq_ignore_ascii_case("enabled") {
            return Ok(false);
        }
        let switched = self.run(&["radio", "wifi", "on"])?;
        if switched.status.success() {
            Ok(true)
        } else {
            Err(WsnError::ScanSource {
                source_name: "nmcli",
                details: format!(
                    "radio wifi on failed: {}",
                    String::from_utf8_lossy(&switched.stderr).trim()
                ),
            })
        }
    }

    fn trigger_scan(&self) -> bool {
        let args = self.with_interface(vec!["device", "wifi", "rescan"]);
        match self.run(&args) {
            Ok(out) => out.status.success(),
            Err(err) => {
                eprintln!("[WSN-SCAN] {err}");
                false
            }
        }
    }

    fn latest_results(&self) -> Option<Vec<NetworkObservation>> {
        let args = self.with_interface(vec![
            "--terse",
            "--fields",
            LIST_FIELDS,
            "device",
            "wifi",
            "list",
            "--rescan",
            "no",
        ]);
        let out = match self.run(&args) {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                eprintln!(
                    "[WSN-SCAN] nmcli list failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                return None;
            }
            Err(err) => {
                eprintln!("[WSN-SCAN] {err}");
                return None;
            }
        };
        Some(parse_wifi_list(&String::from_utf8_lossy(&out.stdout)))
    }
}

/// Run `command` to completion, or kill it once `limit` has passed.
///
/// `Ok(None)` means the child was killed. Output pipes are drained on their
/// own threads so a chatty child cannot stall on a full pipe.
pub fn output_within(mut command: Command, limit: Duration) -> io::Result<Option<Output>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + limit;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Some(Output {
        status,
        stdout: collected(stdout),
        stderr: collected(stderr),
    }))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collected(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Parse `nmcli -t -f SSID,BSSID,SIGNAL,FREQ,SECURITY device wifi list`.
///
/// Lines that do not have five fields or carry unparsable numbers are skipped.
#[must_use]
pub fn parse_wifi_list(raw: &str) -> Vec<NetworkObservation> {
    let stamp = now_seconds();
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = split_terse(line);
            if fields.len() != 5 {
                eprintln!("[WSN-SCAN] skipping nmcli line with {} fields: {line}", fields.len());
                return None;
            }
            let signal = fields[2].trim().parse::<i32>().ok()?;
            let frequency = parse_frequency(&fields[3])?;
            Some(NetworkObservation {
                ssid: fields[0].clone(),
                bssid: fields[1].to_ascii_lowercase(),
                rssi: signal_percent_to_dbm(signal),
                frequency,
                capabilities: capabilities_from_security(&fields[4]),
                observed_at: stamp,
                location: None,
            })
        })
        .collect()
}

/// Split a terse line on unescaped `:`; `\:` and `\\` are literal.
#[must_use]
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// NetworkManager reports quality 0..=100; map linearly onto -100..=-50 dBm.
#[must_use]
pub fn signal_percent_to_dbm(percent: i32) -> i32 {
    percent.clamp(0, 100) / 2 - 100
}

fn parse_frequency(raw: &str) -> Option<u32> {
    raw.split_whitespace().next()?.parse::<u32>().ok()
}

/// Render nmcli security tokens as bracketed capability text.
#[must_use]
pub fn capabilities_from_security(security: &str) -> String {
    let mut caps = String::new();
    for token in security.split_whitespace() {
        let mapped = match token.to_ascii_uppercase().as_str() {
            "WPA1" | "WPA" => "[WPA-PSK-TKIP]",
            "WPA2" => "[WPA2-PSK-CCMP]",
            "WPA3" => "[WPA3-SAE-CCMP]",
            "WEP" => "[WEP]",
            "802.1X" => "[EAP]",
            "OWE" => "[OWE]",
            _ => continue,
        };
        caps.push_str(mapped);
    }
    caps.push_str("[ESS]");
    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::rules::label_for_capabilities;
    use crate::pipeline::records::RiskLabel;

    #[cfg(unix)]
    #[test]
    fn bounded_command_returns_its_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo enabled"]);
        let out = output_within(command, Duration::from_secs(5))
            .unwrap()
            .expect("finished in time");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "enabled");
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_is_killed_at_the_deadline() {
        let mut command = Command::new("sleep");
        command.arg("10");
        let started = Instant::now();
        let out = output_within(command, Duration::from_millis(100)).unwrap();
        assert!(out.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn terse_split_honours_escapes() {
        let fields = split_terse(r"Cafe\:Bar:AA\:BB\:CC\:DD\:EE\:FF:72:2437 MHz:WPA2");
        assert_eq!(
            fields,
            vec!["Cafe:Bar", "AA:BB:CC:DD:EE:FF", "72", "2437 MHz", "WPA2"]
        );
        assert_eq!(split_terse(r"a\\b:c"), vec![r"a\b", "c"]);
    }

    #[test]
    fn parses_list_output() {
        let raw = "Home:AA\\:BB\\:CC\\:DD\\:EE\\:01:80:5180 MHz:WPA2 WPA3\n\
                   Open:AA\\:BB\\:CC\\:DD\\:EE\\:02:40:2412 MHz:\n\
                   \n\
                   broken line\n\
                   Bad:AA\\:BB\\:CC\\:DD\\:EE\\:03:xx:2412 MHz:WEP\n";
        let obs = parse_wifi_list(raw);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].ssid, "Home");
        assert_eq!(obs[0].bssid, "aa:bb:cc:dd:ee:01");
        assert_eq!(obs[0].rssi, -60);
        assert_eq!(obs[0].frequency, 5180);
        assert_eq!(obs[0].capabilities, "[WPA2-PSK-CCMP][WPA3-SAE-CCMP][ESS]");
        assert_eq!(obs[1].capabilities, "[ESS]");
        assert_eq!(obs[1].rssi, -80);
    }

    #[test]
    fn signal_mapping_is_clamped() {
        assert_eq!(signal_percent_to_dbm(100), -50);
        assert_eq!(signal_percent_to_dbm(0), -100);
        assert_eq!(signal_percent_to_dbm(250), -50);
        assert_eq!(signal_percent_to_dbm(-5), -100);
    }

    #[test]
    fn mapped_capabilities_classify_as_expected() {
        assert_eq!(
            label_for_capabilities(&capabilities_from_security("WPA2")),
            RiskLabel::Safe
        );
        assert_eq!(
            label_for_capabilities(&capabilities_from_security("WPA3")),
            RiskLabel::Safe
        );
        assert_eq!(
            label_for_capabilities(&capabilities_from_security("WEP")),
            RiskLabel::Medium
        );
        assert_eq!(
            label_for_capabilities(&capabilities_from_security("WPA1")),
            RiskLabel::Medium
        );
        assert_eq!(
            label_for_capabilities(&capabilities_from_security("--")),
            RiskLabel::Dangerous
        );
    }
}
