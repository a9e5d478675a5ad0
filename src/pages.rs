//! HTML pages of the provisioning portal

use crate::services::network::NetworkReport;
use std::fmt::Write;

const STYLE: &str = r#"
      body { font-family: "Nunito", system-ui, sans-serif; background-color: #f9f9f9; color: #333; margin: 0; padding: 0; }
      .banner { font-weight: 700; background-color: #FFBF00; padding: 5px; text-align: center; margin: 0; }
      .content { padding: 20px; }
      .player-id { font-family: "Courier New", Courier, monospace; font-weight: bold; }
      .card { border: 1px solid #aaa; border-radius: 5px; max-width: 600px; margin-top: 20px; }
      .card h3 { margin: 0; }
      .info-list { list-style-type: none; padding-left: 5px; }
      .info-list li { margin: 5px 0; }
      .error { color: #b00020; }
      input, select { padding: 8px; margin: 4px 0 12px; width: 280px; max-width: 100%; }
      button { padding: 8px 16px; }
      a { color: #007BFF; text-decoration: none; }
"#;

/// Landing page data
pub struct Landing<'a> {
    pub device_id: &'a str,
    pub registration_url: &'a str,
    pub port: u16,
    pub report: &'a NetworkReport,
    pub server_url: &'a str,
}

pub fn landing(page: &Landing<'_>) -> String {
    let connection = &page.report.connection;

    let mut links = String::new();
    for ip in &page.report.local_ips {
        let url = format!("http://{ip}:{}", page.port);
        let _ = write!(
            links,
            r#" <a href="{url}" target="_blank">{url}</a>"#,
            url = escape(&url)
        );
    }

    let body = format!(
        r#"    <div class="content">
      <p>Player id: <span class="player-id">{device_id}</span></p>
      <p>Register your player id at <a href="{registration_url}" target="_blank">{registration_url}</a> to manage.</p>
      <p>To connect from browser use:{links}</p>
      <div class="card">
        <h3 class="banner">Status of Network</h3>
        <ul class="info-list">
          <li>Ethernet: {ethernet}</li>
          <li>DNS: {dns}</li>
          <li>PING: {ping}</li>
          <li>DHCP: {dhcp}</li>
        </ul>
      </div>
      <div class="card">
        <h3 class="banner">Connectivity Status</h3>
        <ul class="info-list">
          <li>Server: {server_url}</li>
          <li>Status: {server}</li>
        </ul>
      </div>
    </div>"#,
        device_id = escape(page.device_id),
        registration_url = escape(page.registration_url),
        ethernet = connection.ethernet,
        dns = connection.dns,
        ping = connection.ping,
        dhcp = escape(&connection.dhcp),
        server_url = escape(page.server_url),
        server = connection.server,
    );

    document("Welcome!", &body)
}

/// WiFi setup form listing the scanned networks
pub fn wifi_setup(networks: &[String], error: Option<&str>) -> String {
    let options: String = networks
        .iter()
        .map(|ssid| format!(r#"<option value="{0}">{0}</option>"#, escape(ssid)))
        .collect();

    let error = error
        .map(|error| format!(r#"<p class="error">{}</p>"#, escape(error)))
        .unwrap_or_default();

    let body = format!(
        r#"    <div class="content">
      {error}
      <form method="post" action="/wifi-setup">
        <label for="ssid">Network</label><br>
        <input id="ssid" name="ssid" list="networks" required autocomplete="off"><br>
        <datalist id="networks">{options}</datalist>
        <label for="password">Password</label><br>
        <input id="password" name="password" type="password"><br>
        <button type="submit">Connect</button>
      </form>
    </div>"#
    );

    document("WiFi Setup", &body)
}

/// Outcome of a WiFi setup submission
pub fn wifi_result(message: &str, connected: bool) -> String {
    let status = if connected {
        r#"<p>The player is connected. <a href="/">Continue</a></p>"#
    } else {
        r#"<p class="error">The player is not connected yet. <a href="/wifi-setup">Try again</a></p>"#
    };

    let body = format!(
        r#"    <div class="content">
      <p>{message}</p>
      {status}
    </div>"#,
        message = escape(message)
    );

    document("WiFi Setup", &body)
}

fn document(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>{STYLE}</style>
  </head>
  <body>
    <h1 class="banner">{title}</h1>
{body}
  </body>
</html>"#
    )
}

/// Escape text for use in HTML content and quoted attribute values
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config_store::ConnectionSnapshot;
    use std::net::Ipv4Addr;

    #[test]
    fn escape_handles_markup() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn landing_lists_addresses_and_status() {
        let report = NetworkReport {
            local_ips: vec![Ipv4Addr::new(192, 168, 1, 20)],
            connection: ConnectionSnapshot::default(),
        };

        let html = landing(&Landing {
            device_id: "1000-0000-1234-5678",
            registration_url: "https://acusign.pro/?player_id=1000-0000-1234-5678",
            port: 5000,
            report: &report,
            server_url: "https://acusign.pro",
        });

        assert!(html.contains("1000-0000-1234-5678"));
        assert!(html.contains("http://192.168.1.20:5000"));
        assert!(html.contains("<li>Ethernet: DOWN</li>"));
        assert!(html.contains("<li>DHCP: Unknown</li>"));
        assert!(html.contains("<li>Status: Not Connected</li>"));
    }

    #[test]
    fn setup_form_escapes_ssids() {
        let html = wifi_setup(&["<script>".to_string()], Some("SSID must not be empty"));

        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<option value=\"<script>\""));
        assert!(html.contains("SSID must not be empty"));
    }
}
