//! Client configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::playout::{DecoderFactory, PassthroughDecoderFactory};
use crate::protocol::constants::*;

/// Client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// RTMP URL to connect to (rtmp://host[:port]/app[/instance])
    pub url: String,

    /// Connection timeout (TCP connect, handshake and connect reply)
    pub connect_timeout: Duration,

    /// Give up when nothing arrives for this long
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Flash version string to send
    pub flash_ver: String,

    /// SWF URL to send
    pub swf_url: Option<String>,

    /// Page URL to send
    pub page_url: Option<String>,

    /// Buffer length announced to the server in milliseconds
    pub buffer_length: u32,

    /// Outbound chunk size to negotiate once connected (`None` keeps 128)
    pub chunk_size: Option<u32>,

    /// Buffered media duration that starts playout
    pub playout_threshold: Duration,

    /// Transport read buffer size in bytes
    pub read_buffer_size: usize,

    /// Most chunks written per transmit batch
    pub transmit_batch: usize,

    /// Creates media decoders when a stream's codec changes
    pub decoder_factory: Arc<dyn DecoderFactory>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            tcp_nodelay: true,
            flash_ver: DEFAULT_FLASH_VER.to_string(),
            swf_url: None,
            page_url: None,
            buffer_length: DEFAULT_BUFFER_LENGTH,
            chunk_size: None,
            playout_threshold: Duration::from_millis(DEFAULT_PLAYOUT_THRESHOLD_MS),
            read_buffer_size: 64 * 1024,
            transmit_batch: 64,
            decoder_factory: Arc::new(PassthroughDecoderFactory),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("flash_ver", &self.flash_ver)
            .field("swf_url", &self.swf_url)
            .field("page_url", &self.page_url)
            .field("buffer_length", &self.buffer_length)
            .field("chunk_size", &self.chunk_size)
            .field("playout_threshold", &self.playout_threshold)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("transmit_batch", &self.transmit_batch)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn with_playout_threshold(mut self, threshold: Duration) -> Self {
        self.playout_threshold = threshold;
        self
    }

    pub fn with_decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = factory;
        self
    }

    /// Parse URL into components
    pub fn parse_url(&self) -> Result<ParsedUrl> {
        ParsedUrl::parse(&self.url)
    }

    /// Check everything that can be checked before any I/O
    pub fn validate(&self) -> Result<ParsedUrl> {
        if let Some(size) = self.chunk_size {
            if size == 0 || size > MAX_CHUNK_SIZE {
                return Err(Error::Config(format!("chunk size {} out of range", size)));
            }
        }
        if self.read_buffer_size == 0 || self.transmit_batch == 0 {
            return Err(Error::Config("buffer sizes must be non-zero".into()));
        }
        self.parse_url()
    }
}

/// Parsed RTMP URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub app: String,
    pub instance: Option<String>,
}

impl ParsedUrl {
    /// Parse `scheme://host[:port]/app[/instance]`
    ///
    /// Only plain `rtmp` is spoken; tunneled and encrypted variants fail
    /// with [`Error::UnsupportedScheme`].
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::InvalidUrl(format!("missing scheme in {:?}", url)))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "rtmp" {
            return Err(Error::UnsupportedScheme(scheme));
        }

        let (host_port, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidUrl(format!("missing application in {:?}", url)))?;

        let (host, port) = split_host_port(host_port)
            .ok_or_else(|| Error::InvalidUrl(format!("bad host or port in {:?}", url)))?;

        let (app, instance) = match path.split_once('/') {
            Some((a, i)) => (a, Some(i)),
            None => (path, None),
        };
        if app.is_empty() {
            return Err(Error::InvalidUrl(format!("empty application in {:?}", url)));
        }

        Ok(ParsedUrl {
            scheme,
            host: host.to_string(),
            port,
            app: app.to_string(),
            instance: instance.filter(|i| !i.is_empty()).map(str::to_string),
        })
    }

    /// `tcUrl` sent with connect
    pub fn tc_url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}/{}", self.scheme, self.host, self.port, self.app)
        } else {
            format!("{}://{}:{}/{}", self.scheme, self.host, self.port, self.app)
        }
    }

    /// Address for the TCP connect
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(host_port: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        // [v6addr] or [v6addr]:port
        let (host, after) = bracketed.split_once(']')?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':')?)),
        }
    } else if let Some((h, p)) = host_port.split_once(':') {
        (h, Some(p))
    } else {
        (host_port, None)
    };

    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => p.parse().ok()?,
        None => RTMP_PORT,
    };
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let parsed = ParsedUrl::parse("rtmp://localhost/live/test").unwrap();
        assert_eq!(parsed.scheme, "rtmp");
        assert_eq!(parsed.host, "localhost");
        assert_eq!(parsed.port, 1935);
        assert_eq!(parsed.app, "live");
        assert_eq!(parsed.instance, Some("test".into()));
        assert_eq!(parsed.tc_url(), "rtmp://localhost:1935/live");

        let parsed = ParsedUrl::parse("RTMP://example.com:1936/app").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 1936);
        assert_eq!(parsed.app, "app");
        assert_eq!(parsed.instance, None);
        assert_eq!(parsed.socket_addr(), "example.com:1936");
    }

    #[test]
    fn test_instance_keeps_rest_of_path() {
        let parsed = ParsedUrl::parse("rtmp://h/vod/mp4:folder/clip.mp4").unwrap();
        assert_eq!(parsed.app, "vod");
        assert_eq!(parsed.instance.as_deref(), Some("mp4:folder/clip.mp4"));
    }

    #[test]
    fn test_ipv6_host() {
        let parsed = ParsedUrl::parse("rtmp://[::1]:1940/live").unwrap();
        assert_eq!(parsed.host, "::1");
        assert_eq!(parsed.port, 1940);
        assert_eq!(parsed.socket_addr(), "[::1]:1940");
        assert_eq!(parsed.tc_url(), "rtmp://[::1]:1940/live");
    }

    #[test]
    fn test_unsupported_schemes() {
        for url in [
            "rtmpt://host/app",
            "rtmps://host/app",
            "rtmpe://host/app",
            "rtmpte://host/app",
            "http://host/app",
        ] {
            assert!(
                matches!(ParsedUrl::parse(url), Err(Error::UnsupportedScheme(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_malformed_urls() {
        for url in [
            "localhost/live",
            "rtmp://",
            "rtmp://host",
            "rtmp://host/",
            "rtmp://:1935/app",
            "rtmp://host:notaport/app",
            "rtmp://host:99999/app",
            "rtmp://[::1/app",
        ] {
            assert!(matches!(ParsedUrl::parse(url), Err(Error::InvalidUrl(_))), "{}", url);
        }
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("rtmp://h/app").validate().is_ok());
        assert!(matches!(
            ClientConfig::new("rtmp://h/app").with_chunk_size(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ClientConfig::new("rtmps://h/app").validate(),
            Err(Error::UnsupportedScheme(_))
        ));
    }
}
