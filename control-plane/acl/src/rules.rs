use crate::{Gateway, RulesConfig};

const NODE_WRITE: &str = "  node_prefix \"\" {\n    policy = \"write\"\n  }";

/// Renders `lines` as a document, inside the partition block when
/// partitions are enabled.
fn document(partition: Option<&str>, lines: Vec<String>) -> String {
    let body = lines.join("\n");
    match partition {
        Some(p) => format!("\npartition \"{p}\" {{\n{body}\n}}"),
        None => format!("\n{body}"),
    }
}

/// Wraps `body` in a namespace block when namespaces are enabled.
fn in_namespace(enabled: bool, header: &str, body: &str) -> String {
    if enabled {
        format!("  {header} {{\n{body}\n  }}")
    } else {
        body.to_string()
    }
}

impl RulesConfig {
    /// Client agents register their node and read services.
    pub fn agent_rules(&self) -> String {
        let services = "    service_prefix \"\" {\n      policy = \"read\"\n    }";
        document(
            self.partition(),
            vec![
                NODE_WRITE.to_string(),
                in_namespace(self.enable_namespaces, "namespace_prefix \"\"", services),
            ],
        )
    }

    /// The anonymous token allows DNS lookups across the cluster.
    pub fn anonymous_token_rules(&self) -> String {
        let body = "    node_prefix \"\" {\n       policy = \"read\"\n    }\n    service_prefix \"\" {\n       policy = \"read\"\n    }";
        let body = in_namespace(self.enable_namespaces, "namespace_prefix \"\"", body);
        match self.partition() {
            // Lookups may cross partitions.
            Some(_) => format!("\npartition_prefix \"\" {{\n{body}\n}}"),
            None => format!("\n{body}"),
        }
    }

    pub fn inject_rules(&self) -> String {
        let partition = self.partition();
        let mut lines = Vec::new();
        if self.enable_namespaces && partition.is_none() {
            lines.push("  operator = \"write\"".to_string());
        }
        if self.enable_peering {
            lines.push("  peering = \"write\"".to_string());
        }
        lines.push(NODE_WRITE.to_string());

        let mut body = Vec::new();
        if self.enable_namespaces && partition.is_some() {
            body.push("    policy = \"write\"");
        }
        body.push("    acl = \"write\"");
        body.push("    service_prefix \"\" {\n      policy = \"write\"\n    }");
        lines.push(in_namespace(
            self.enable_namespaces,
            "namespace_prefix \"\"",
            &body.join("\n"),
        ));

        document(partition, lines)
    }

    /// The CRD controller writes config entries and intentions into the
    /// namespaces injected services live in.
    pub fn controller_rules(&self) -> String {
        let partition = self.partition();
        let mut lines = vec![
            match partition {
                Some(_) => "  mesh = \"write\"".to_string(),
                None => "  operator = \"write\"".to_string(),
            },
            "  acl = \"write\"".to_string(),
        ];

        let mut body = Vec::new();
        if self.enable_namespaces && partition.is_some() {
            body.push("    policy = \"write\"");
        }
        body.push("    service_prefix \"\" {\n      policy = \"write\"\n      intentions = \"write\"\n    }");
        let header = if self.inject_mirroring {
            format!("namespace_prefix \"{}\"", self.inject_mirroring_prefix)
        } else {
            format!("namespace \"{}\"", self.inject_destination_namespace)
        };
        lines.push(in_namespace(
            self.enable_namespaces,
            &header,
            &body.join("\n"),
        ));

        document(partition, lines)
    }

    /// Catalog sync owns its node and writes services into the destination
    /// or mirrored namespaces.
    pub fn sync_rules(&self) -> String {
        let partition = self.partition();
        let node = format!(
            "node \"{}\" {{\n    policy = \"write\"\n  }}",
            self.sync_node_name
        );

        let mut body = Vec::new();
        if self.enable_namespaces && partition.is_some() {
            body.push("    policy = \"write\"");
        }
        body.push("    node_prefix \"\" {\n      policy = \"read\"\n    }");
        body.push("    service_prefix \"\" {\n      policy = \"write\"\n    }");
        let header = if self.sync_mirroring {
            format!("namespace_prefix \"{}\"", self.sync_mirroring_prefix)
        } else {
            format!("namespace \"{}\"", self.sync_destination_namespace)
        };
        let body = in_namespace(self.enable_namespaces, &header, &body.join("\n"));

        let mut lines = Vec::new();
        if partition.is_some() {
            lines.push("  mesh = \"write\"".to_string());
            lines.push("  acl = \"write\"".to_string());
        } else if self.enable_namespaces {
            lines.push("  operator = \"write\"".to_string());
            lines.push("  acl = \"write\"".to_string());
        }
        lines.push(body);

        format!("{node}{}", document(partition, lines))
    }

    /// Secondary datacenters replicate ACLs with this token.
    pub fn replication_token_rules(&self) -> String {
        let body = "    acl = \"write\"\n    service_prefix \"\" {\n      policy = \"write\"\n      intentions = \"read\"\n    }";
        document(
            self.partition(),
            vec![
                "  operator = \"write\"".to_string(),
                "  agent_prefix \"\" {\n    policy = \"read\"\n  }".to_string(),
                NODE_WRITE.to_string(),
                in_namespace(self.enable_namespaces, "namespace_prefix \"\"", body),
            ],
        )
    }

    /// The API gateway controller manages gateway services, their
    /// intentions and their tokens.
    pub fn api_gateway_controller_rules(&self) -> String {
        let body = "  service_prefix \"\" {\n    policy = \"write\"\n    intentions = \"write\"\n  }\n  node_prefix \"\" {\n    policy = \"read\"\n  }";
        let body = if self.enable_namespaces {
            format!("namespace_prefix \"\" {{\n{body}\n}}")
        } else {
            body.to_string()
        };
        format!("\noperator = \"write\"\nacl = \"write\"\n{body}")
    }

    pub fn mesh_gateway_rules(&self) -> String {
        let mut out = String::from("mesh = \"write\"\n");
        if self.enable_peering {
            out.push_str("peering = \"read\"\npartition_prefix \"\" {\n  peering = \"read\"\n}\n");
        }

        let service = "  service \"mesh-gateway\" {\n     policy = \"write\"\n  }";
        let read = "  node_prefix \"\" {\n  \tpolicy = \"read\"\n  }\n  service_prefix \"\" {\n     policy = \"read\"\n  }";
        if self.enable_namespaces {
            out.push_str(&format!(
                "namespace \"default\" {{\n{service}\n}}\nnamespace_prefix \"\" {{\n{read}\n}}"
            ));
        } else {
            out.push_str(service);
            out.push('\n');
            out.push_str(read);
        }
        out
    }

    pub fn ingress_gateway_rules(&self, gateway: &Gateway) -> String {
        self.gateway_rules(gateway, true)
    }

    pub fn terminating_gateway_rules(&self, gateway: &Gateway) -> String {
        self.gateway_rules(gateway, false)
    }

    /// Gateways write their own service; ingress gateways also read the
    /// services they route to.
    fn gateway_rules(&self, gateway: &Gateway, read_services: bool) -> String {
        let mut body = format!(
            "    service \"{}\" {{\n       policy = \"write\"\n    }}\n    node_prefix \"\" {{\n      policy = \"read\"\n    }}",
            gateway.name
        );
        if read_services {
            body.push_str("\n    service_prefix \"\" {\n      policy = \"read\"\n    }");
        }
        let header = format!("namespace \"{}\"", gateway.namespace);
        document(
            self.partition(),
            vec![in_namespace(self.enable_namespaces, &header, &body)],
        )
    }
}
