use crate::domain::result::ResolutionError;
use url::Url;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Real-time transport address discovered in a thing description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionEndpoint {
    pub href: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ConnectionEndpoint {
    pub fn from_href(href: &str) -> Result<Self, ResolutionError> {
        let url = Url::parse(href).map_err(|e| ResolutionError::InvalidUrl {
            url: href.to_string(),
            reason: e.to_string(),
        })?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolutionError::InvalidUrl {
                url: href.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();

        let port = url
            .port()
            .or_else(|| default_port(url.scheme()))
            .or_else(|| url.port_or_known_default())
            .ok_or_else(|| ResolutionError::InvalidUrl {
                url: href.to_string(),
                reason: format!("no port and no default for scheme '{}'", url.scheme()),
            })?;

        Ok(Self {
            href: href.to_string(),
            host,
            port,
            path: url.path().to_string(),
        })
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "mqtt" | "tcp" => Some(DEFAULT_MQTT_PORT),
        "mqtts" | "ssl" => Some(DEFAULT_MQTTS_PORT),
        _ => None,
    }
}
