//! Verify command - token check

use anyhow::Result;
use flickd_client::{FlickdClient, Token, TokenStatus};

use crate::output::{OutputContext, VerifyRow};

/// Check a token with the service
pub async fn verify(client: &FlickdClient, token: &Token, ctx: &OutputContext) -> Result<()> {
    let status = client.uploads().verify_token(token).await;
    ctx.print_one(&VerifyRow {
        status: format!("{:?}", status).to_lowercase(),
    });

    match status {
        TokenStatus::Valid => Ok(()),
        TokenStatus::Expired => anyhow::bail!("Token rejected; run `flickd login` again"),
        TokenStatus::Unreachable => anyhow::bail!("Service unreachable"),
    }
}
