//! nginx vhost rendering

/// Render an HTTPS vhost: HTTP→HTTPS redirect, TLS termination, upstream
/// proxy to the confirmed port, forwarding + WebSocket upgrade headers,
/// and generous timeouts for slow-starting apps.
pub fn render_https(domain: &str, port: u16) -> String {
    format!(
        r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    return 301 https://$host$request_uri;
}}

server {{
    listen 443 ssl;
    listen [::]:443 ssl;
    server_name {domain};

    ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;
    ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_connect_timeout 300s;
        proxy_send_timeout 300s;
        proxy_read_timeout 300s;
    }}
}}
"#
    )
}

/// Render a plain HTTP vhost. Used when certificate issuance failed:
/// availability takes priority over hardening in that path.
pub fn render_http(domain: &str, port: u16) -> String {
    format!(
        r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_connect_timeout 300s;
        proxy_send_timeout 300s;
        proxy_read_timeout 300s;
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_vhost_contents() {
        let vhost = render_https("demo.apps.wharf.sh", 5173);
        assert!(vhost.contains("server_name demo.apps.wharf.sh;"));
        assert!(vhost.contains("proxy_pass http://127.0.0.1:5173;"));
        assert!(vhost.contains("return 301 https://$host$request_uri;"));
        assert!(vhost.contains("ssl_certificate /etc/letsencrypt/live/demo.apps.wharf.sh/fullchain.pem;"));
        assert!(vhost.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(vhost.contains("proxy_read_timeout 300s;"));
    }

    #[test]
    fn test_http_vhost_has_no_tls() {
        let vhost = render_http("demo.apps.wharf.sh", 4000);
        assert!(vhost.contains("proxy_pass http://127.0.0.1:4000;"));
        assert!(!vhost.contains("ssl_certificate"));
        assert!(!vhost.contains("return 301"));
    }
}
