use std::fmt::Write;

use crate::validate::is_ipv4;

pub const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
pub const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";
pub const LOG_DIR: &str = "/var/log/nginx";
pub const LETSENCRYPT_LIVE: &str = "/etc/letsencrypt/live";

/// Extensions served with a one-year immutable cache header.
pub const CACHED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "ico", "css", "js", "svg", "woff", "woff2", "ttf", "eot",
];

/// Nginx server block for one static site.
///
/// # Example
///
/// ```
/// use pagelift::VHostConfig;
///
/// let vhost = VHostConfig::for_site("shop.example.com", "/var/www/shop", true, None);
///
/// assert_eq!(vhost.server_name, "shop.example.com");
/// assert_eq!(vhost.log_base_name, "shop-example-com");
/// assert_eq!(vhost.cert_domain.as_deref(), Some("shop.example.com"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VHostConfig {
    pub server_name: String,
    pub document_root: String,
    pub log_base_name: String,
    pub ssl: bool,
    pub cert_domain: Option<String>,
}

/// File name of the config in sites-available: the explicit name, or
/// the domain with dots replaced by hyphens plus `.conf`.
///
/// ```
/// use pagelift::nginx::config_file_name;
///
/// assert_eq!(config_file_name("my.site.org", None), "my-site-org.conf");
/// assert_eq!(config_file_name("my.site.org", Some("custom.conf")), "custom.conf");
/// ```
#[must_use]
pub fn config_file_name(domain: &str, explicit: Option<&str>) -> String {
    explicit.map_or_else(|| format!("{}.conf", domain.replace('.', "-")), ToString::to_string)
}

impl VHostConfig {
    /// Derive the server block for `domain` serving `document_root`.
    ///
    /// An IPv4 address as domain yields the catch-all server name `_`.
    #[must_use]
    pub fn for_site(
        domain: &str,
        document_root: &str,
        ssl: bool,
        config_name: Option<&str>,
    ) -> Self {
        let server_name = if is_ipv4(domain) {
            "_".to_string()
        } else {
            domain.to_string()
        };
        let file_name = config_file_name(domain, config_name);
        let log_base_name = file_name
            .strip_suffix(".conf")
            .unwrap_or(&file_name)
            .to_string();

        Self {
            server_name,
            document_root: document_root.to_string(),
            log_base_name,
            ssl,
            cert_domain: ssl.then(|| domain.to_string()),
        }
    }

    #[must_use]
    pub fn certificate_path(&self) -> Option<String> {
        self.cert_domain
            .as_ref()
            .map(|d| format!("{LETSENCRYPT_LIVE}/{d}/fullchain.pem"))
    }

    #[must_use]
    pub fn certificate_key_path(&self) -> Option<String> {
        self.cert_domain
            .as_ref()
            .map(|d| format!("{LETSENCRYPT_LIVE}/{d}/privkey.pem"))
    }

    /// Render the configuration file.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        match (self.certificate_path(), self.certificate_key_path(), &self.cert_domain) {
            (Some(cert), Some(key), Some(domain)) if self.ssl => {
                let _ = writeln!(out, "server {{");
                let _ = writeln!(out, "    listen 80;");
                let _ = writeln!(out, "    server_name {};", self.server_name);
                let _ = writeln!(out, "    return 301 https://{domain}$request_uri;");
                let _ = writeln!(out, "}}");
                let _ = writeln!(out);
                let _ = writeln!(out, "server {{");
                let _ = writeln!(out, "    listen 443 ssl http2;");
                let _ = writeln!(out, "    server_name {};", self.server_name);
                let _ = writeln!(out, "    ssl_certificate {cert};");
                let _ = writeln!(out, "    ssl_certificate_key {key};");
                let _ = writeln!(out, "    ssl_protocols TLSv1.2 TLSv1.3;");
                let _ = writeln!(out, "    ssl_ciphers HIGH:!aNULL:!MD5;");
                let _ = writeln!(out, "    ssl_prefer_server_ciphers on;");
            }
            _ => {
                let _ = writeln!(out, "server {{");
                let _ = writeln!(out, "    listen 80;");
                let _ = writeln!(out, "    server_name {};", self.server_name);
            }
        }

        self.write_site_directives(&mut out);
        let _ = writeln!(out, "}}");
        out
    }

    fn write_site_directives(&self, out: &mut String) {
        let log = &self.log_base_name;
        let _ = writeln!(out, "    root {};", self.document_root);
        let _ = writeln!(out, "    index index.html index.htm;");
        let _ = writeln!(out, "    access_log {LOG_DIR}/{log}_access.log;");
        let _ = writeln!(out, "    error_log {LOG_DIR}/{log}_error.log;");
        let _ = writeln!(out, "    location / {{");
        let _ = writeln!(out, "        try_files $uri $uri/ /index.html;");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "    location = /favicon.ico {{");
        let _ = writeln!(out, "        log_not_found off;");
        let _ = writeln!(out, "        access_log off;");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(
            out,
            "    location ~* \\.({})$ {{",
            CACHED_EXTENSIONS.join("|")
        );
        let _ = writeln!(out, "        expires 1y;");
        let _ = writeln!(out, "        add_header Cache-Control \"public, immutable\";");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "    location ~ /\\. {{");
        let _ = writeln!(out, "        deny all;");
        let _ = writeln!(out, "        access_log off;");
        let _ = writeln!(out, "        log_not_found off;");
        let _ = writeln!(out, "    }}");
    }
}
