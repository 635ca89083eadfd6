//! Operator commands against a running locator.
//!
//! Every command prints the locator's OK/ERROR status and message, and
//! exits non-zero on ERROR.

use std::path::Path;

use anyhow::{Context, bail};
use cfgsync_api::LocatorClient;
use cfgsync_core::CommandResult;

fn report(result: CommandResult) -> anyhow::Result<()> {
    let status = if result.is_ok() { "OK" } else { "ERROR" };
    println!("{status}: {}", result.message);
    if let Some(data) = &result.data {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    if !result.is_ok() {
        bail!("{}", result.message);
    }
    Ok(())
}

pub async fn deploy(
    locator: &str,
    jar: &Path,
    group: Option<&str>,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let base_name = match name {
        Some(name) => name.to_string(),
        None => jar
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("cannot derive an artifact name from {}", jar.display()))?
            .to_string(),
    };
    let content = std::fs::read(jar).with_context(|| format!("failed to read {}", jar.display()))?;

    let client = LocatorClient::new(locator)?;
    report(client.deploy(group, &base_name, content).await?)
}

pub async fn undeploy(locator: &str, name: &str, group: Option<&str>) -> anyhow::Result<()> {
    let client = LocatorClient::new(locator)?;
    report(client.undeploy(group, name).await?)
}

pub async fn import(locator: &str, zip_file_name: &Path) -> anyhow::Result<()> {
    let archive = std::fs::read(zip_file_name)
        .with_context(|| format!("failed to read {}", zip_file_name.display()))?;
    let client = LocatorClient::new(locator)?;
    report(client.import(archive).await?)
}

pub async fn export(locator: &str, zip_file_name: &Path) -> anyhow::Result<()> {
    let client = LocatorClient::new(locator)?;
    let archive = client.export().await?;
    std::fs::write(zip_file_name, &archive)
        .with_context(|| format!("failed to write {}", zip_file_name.display()))?;
    println!("OK: exported {} bytes to {}", archive.len(), zip_file_name.display());
    Ok(())
}

pub async fn members(locator: &str) -> anyhow::Result<()> {
    let client = LocatorClient::new(locator)?;
    let members = client.members().await?;
    if members.is_empty() {
        println!("no members");
    }
    for member in members {
        let groups = if member.groups.is_empty() {
            "-".to_string()
        } else {
            member.groups.join(",")
        };
        println!("{}\t{}\t{}\t{}", member.id, member.state, groups, member.endpoint);
        if let Some(failure) = member.failure {
            println!("  failure: {failure}");
        }
    }
    Ok(())
}

pub async fn leave(locator: &str, member_id: &str) -> anyhow::Result<()> {
    let client = LocatorClient::new(locator)?;
    report(client.leave(member_id).await?)
}
