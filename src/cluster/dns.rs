use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;
use tracing::info;

use super::DnsApi;
use crate::exec::CommandSpec;
use crate::exec::ProcessOutput;
use crate::exec::ProcessRunner;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// [`DnsApi`] over the `aws route53` CLI.
///
/// Zone lookup goes by domain name; the first zone returned owns the
/// record. Only the aws cluster type runs the quorum drill, so this is
/// the one DNS backend shipped.
pub struct Route53Dns {
    runner: Arc<dyn ProcessRunner>,
}

impl Route53Dns {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn run_ok(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput> {
        let line = spec.display();
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "aws".to_string(),
                detail: format!("`{line}` exited {}: {}", output.status, output.stderr_utf8()),
            }
            .into());
        }
        Ok(output)
    }

    async fn run_json(
        &self,
        spec: CommandSpec,
    ) -> Result<Value> {
        let output = self.run_ok(spec).await?;
        let value = serde_json::from_slice(&output.stdout)?;
        Ok(value)
    }

    async fn zone_id(
        &self,
        domain: &str,
    ) -> Result<String> {
        let spec = CommandSpec::new("aws")
            .args(["route53", "list-hosted-zones-by-name", "--dns-name"])
            .arg(domain)
            .args(["--max-items", "1", "--output", "json"]);
        let v = self.run_json(spec).await?;
        let id = v["HostedZones"][0]["Id"]
            .as_str()
            .ok_or_else(|| Error::Fatal(format!("no hosted zone found for `{domain}`")))?;
        // API returns "/hostedzone/Z123..."; the change call wants the bare id
        Ok(id.rsplit('/').next().unwrap_or(id).to_string())
    }
}

#[async_trait]
impl DnsApi for Route53Dns {
    async fn upsert_a(
        &self,
        domain: &str,
        fqdn: &str,
        ip: &str,
        ttl: u32,
    ) -> Result<()> {
        let zone_id = self.zone_id(domain).await?;
        let batch = json!({
            "Comment": format!("add {fqdn} -> {ip}"),
            "Changes": [{
                "Action": "UPSERT",
                "ResourceRecordSet": {
                    "Name": fqdn,
                    "Type": "A",
                    "TTL": ttl,
                    "ResourceRecords": [{"Value": ip}],
                }
            }]
        });

        info!(fqdn, ip, zone_id, "upserting A record");
        let spec = CommandSpec::new("aws")
            .args(["route53", "change-resource-record-sets", "--hosted-zone-id"])
            .arg(zone_id)
            .arg("--change-batch")
            .arg(batch.to_string());
        self.run_ok(spec).await?;
        Ok(())
    }
}
