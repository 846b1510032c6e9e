use k8s_openapi::api::core::v1::EnvVar;

const PREPARED_QUERY: &str = "prepared_query";

/// A local listener for an upstream, as declared by the
/// `connect-service-upstreams` annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    /// The service (or prepared query) name, without namespace, partition or
    /// peer qualifiers.
    pub name: String,
    pub port: u16,
}

impl Upstream {
    /// Parses one comma-separated entry: `svc[.ns[.partition]]:port[:dc]` or
    /// `prepared_query:name:port`.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(3, ':').map(str::trim);
        let first = parts.next().filter(|p| !p.is_empty())?;
        let (name, port) = if first == PREPARED_QUERY {
            (parts.next()?, parts.next()?)
        } else {
            let name = first.split('.').next()?;
            (name, parts.next()?)
        };
        if name.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self {
            name: name.to_string(),
            port,
        })
    }

    fn env_prefix(&self) -> String {
        self.name.replace('-', "_").to_uppercase()
    }
}

/// Environment variables pointing application containers at the local
/// upstream listeners.
pub(crate) fn env_vars(upstreams: &[Upstream]) -> Vec<EnvVar> {
    upstreams
        .iter()
        .flat_map(|u| {
            let prefix = u.env_prefix();
            [
                EnvVar {
                    name: format!("{prefix}_CONNECT_SERVICE_HOST"),
                    value: Some("127.0.0.1".to_string()),
                    ..Default::default()
                },
                EnvVar {
                    name: format!("{prefix}_CONNECT_SERVICE_PORT"),
                    value: Some(u.port.to_string()),
                    ..Default::default()
                },
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forms() {
        assert_eq!(
            Upstream::parse("echo:1234"),
            Some(Upstream {
                name: "echo".into(),
                port: 1234
            })
        );
        assert_eq!(
            Upstream::parse(" db.ns1.part1:5432:dc2 "),
            Some(Upstream {
                name: "db".into(),
                port: 5432
            })
        );
        assert_eq!(
            Upstream::parse("prepared_query:geo-cache:8005"),
            Some(Upstream {
                name: "geo-cache".into(),
                port: 8005
            })
        );
        assert_eq!(Upstream::parse("echo"), None);
        assert_eq!(Upstream::parse("echo:abc"), None);
        assert_eq!(Upstream::parse(":1234"), None);
    }

    #[test]
    fn env_names() {
        let env = env_vars(&[Upstream {
            name: "web-admin".into(),
            port: 1234,
        }]);
        let names = env.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            ["WEB_ADMIN_CONNECT_SERVICE_HOST", "WEB_ADMIN_CONNECT_SERVICE_PORT"]
        );
        assert_eq!(env[0].value.as_deref(), Some("127.0.0.1"));
        assert_eq!(env[1].value.as_deref(), Some("1234"));
    }
}
