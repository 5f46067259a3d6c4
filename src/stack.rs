//! The deployment this image is published for, as an explicit dependency
//! graph.  Each resource lists the resources whose outputs it consumes;
//! [`Stack::order`] yields a creation order with dependencies first.

use anyhow::{anyhow, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use strum_macros::{Display, EnumString};

#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum ResourceKind {
    Compartment,
    Vcn,
    NatGateway,
    RouteTable,
    SecurityList,
    Subnet,
    Bucket,
    ImageUpload,
    Image,
    Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resource {
    pub(crate) name: &'static str,
    pub(crate) kind: ResourceKind,
    pub(crate) depends_on: Vec<&'static str>,
    /// Human-readable settings, shown by `plan`.
    pub(crate) settings: Vec<(&'static str, String)>,
}

impl Resource {
    fn new(name: &'static str, kind: ResourceKind, depends_on: &[&'static str]) -> Self {
        Self {
            name,
            kind,
            depends_on: depends_on.to_vec(),
            settings: Vec::new(),
        }
    }

    fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.settings.push((key, value.into()));
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct Stack {
    resources: Vec<Resource>,
}

impl Stack {
    pub(crate) fn add(&mut self, r: Resource) -> Result<()> {
        if self.get(r.name).is_some() {
            return Err(anyhow!("Duplicate resource {}", r.name));
        }
        self.resources.push(r);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Resources ordered so every resource follows its dependencies.
    pub(crate) fn order(&self) -> Result<Vec<&Resource>> {
        let mut g = DiGraphMap::<&str, ()>::new();
        for r in &self.resources {
            g.add_node(r.name);
        }
        for r in &self.resources {
            for &dep in &r.depends_on {
                if self.get(dep).is_none() {
                    return Err(anyhow!("{} depends on unknown resource {}", r.name, dep));
                }
                if dep == r.name {
                    return Err(anyhow!("{} depends on itself", r.name));
                }
                g.add_edge(dep, r.name, ());
            }
        }
        let sorted = toposort(&g, None)
            .map_err(|c| anyhow!("Dependency cycle through {}", c.node_id()))?;
        Ok(sorted.into_iter().filter_map(|n| self.get(n)).collect())
    }

    /// The private-network deployment the bot instance runs in, booting
    /// from the uploaded image.
    pub(crate) fn deployment(download_url: &str, version: &str) -> Result<Self> {
        use ResourceKind::*;
        let mut s = Stack::default();
        s.add(
            Resource::new("cowgill", Compartment, &[]).set("description", "Cowgill Resources"),
        )?;
        s.add(
            Resource::new("vcn", Vcn, &["cowgill"])
                .set("cidr_block", "10.0.0.0/16")
                .set("dns_label", "vcn"),
        )?;
        s.add(
            Resource::new("nat-gateway", NatGateway, &["cowgill", "vcn"])
                .set("display_name", "nat-gw"),
        )?;
        s.add(
            Resource::new("nat-route-table", RouteTable, &["cowgill", "vcn", "nat-gateway"])
                .set("route", "0.0.0.0/0 via nat-gateway"),
        )?;
        s.add(
            Resource::new("private-sec-list", SecurityList, &["cowgill", "vcn"])
                .set("ingress", "none")
                .set("egress", "0.0.0.0/0 all protocols"),
        )?;
        s.add(
            Resource::new(
                "private-subnet",
                Subnet,
                &["cowgill", "vcn", "nat-route-table", "private-sec-list"],
            )
            .set("cidr_block", "10.0.1.0/24")
            .set("prohibit_public_ip_on_vnic", "true"),
        )?;
        s.add(
            Resource::new("os-images-bucket", Bucket, &["cowgill"])
                .set("name", "os_images")
                .set("access_type", "NoPublicAccess"),
        )?;
        s.add(
            Resource::new("talos-oci", ImageUpload, &["os-images-bucket"])
                .set("download_url", download_url)
                .set("object_name", crate::provider::OBJECT_NAME),
        )?;
        s.add(
            Resource::new("talos-image", Image, &["cowgill", "os-images-bucket", "talos-oci"])
                .set("display_name", format!("talos_v{}", version))
                .set("source_image_type", "QCOW2"),
        )?;
        s.add(
            Resource::new(
                "slackbot-compute",
                Instance,
                &["cowgill", "private-subnet", "talos-image"],
            )
            .set("shape", crate::metadata::SHAPE)
            .set("ocpus", "2")
            .set("memory_in_gbs", "12")
            .set("assign_public_ip", "false"),
        )?;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(s: &Stack) -> Vec<&'static str> {
        s.order().unwrap().iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_deployment_order() {
        let s = Stack::deployment("https://example.com/v1.11.5/oracle-arm64.raw.xz", "1.11.5")
            .unwrap();
        let order = names(&s);
        assert_eq!(order.len(), 10);
        let pos = |n: &str| order.iter().position(|&o| o == n).unwrap();
        for r in s.order().unwrap() {
            for d in &r.depends_on {
                assert!(pos(d) < pos(r.name), "{} before {}", d, r.name);
            }
        }
        assert_eq!(order[0], "cowgill");
        assert_eq!(*order.last().unwrap(), "slackbot-compute");
        assert!(pos("talos-oci") < pos("talos-image"));
        assert_eq!(
            s.get("talos-image").unwrap().settings[0],
            ("display_name", "talos_v1.11.5".to_string())
        );
        assert_eq!(ResourceKind::ImageUpload.to_string(), "image-upload");
    }

    #[test]
    fn test_small_graph() {
        let mut s = Stack::default();
        s.add(Resource::new("c", ResourceKind::Subnet, &["a", "b"])).unwrap();
        s.add(Resource::new("b", ResourceKind::Vcn, &["a"])).unwrap();
        s.add(Resource::new("a", ResourceKind::Compartment, &[])).unwrap();
        assert_eq!(names(&s), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_graphs() {
        let mut s = Stack::default();
        s.add(Resource::new("a", ResourceKind::Vcn, &["b"])).unwrap();
        s.add(Resource::new("b", ResourceKind::Subnet, &["a"])).unwrap();
        assert!(s.order().is_err());

        let mut s = Stack::default();
        s.add(Resource::new("a", ResourceKind::Vcn, &["missing"])).unwrap();
        assert!(s.order().is_err());

        let mut s = Stack::default();
        s.add(Resource::new("a", ResourceKind::Vcn, &[])).unwrap();
        assert!(s.add(Resource::new("a", ResourceKind::Subnet, &[])).is_err());
    }
}
