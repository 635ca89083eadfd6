//! In-process member link.

use std::sync::Arc;

use async_trait::async_trait;
use cfgsync_core::{ArtifactPayload, ArtifactRecord, LinkError, MemberLink};

use crate::agent::MemberAgent;

/// Pushes artifacts straight into an agent living in the same process.
#[derive(Clone)]
pub struct LocalLink {
    agent: Arc<MemberAgent>,
}

impl LocalLink {
    pub fn new(agent: Arc<MemberAgent>) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &Arc<MemberAgent> {
        &self.agent
    }
}

#[async_trait]
impl MemberLink for LocalLink {
    async fn apply_artifact(&self, payload: ArtifactPayload) -> Result<ArtifactRecord, LinkError> {
        Ok(self.agent.apply_artifact(payload)?)
    }

    async fn ping(&self) -> Result<(), LinkError> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("local:{}", self.agent.work_dir().display())
    }
}
