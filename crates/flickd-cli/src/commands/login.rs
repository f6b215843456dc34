//! Login command - credential exchange

use anyhow::{Context, Result};
use flickd_client::{Credential, FlickdClient, NoopObserver};

use crate::output::{OutputContext, TokenRow};

/// Exchange credentials for a token and print it
pub async fn login(client: &FlickdClient, credential: Credential, ctx: &OutputContext) -> Result<()> {
    if !credential.is_valid() {
        anyhow::bail!("Provide --username and --password, or --consumer-key and --consumer-secret");
    }

    ctx.info("Exchanging credentials...");
    let token = client
        .exchange()
        .start(credential, NoopObserver)
        .outcome()
        .await
        .context("Credential exchange failed")?;

    ctx.print_one(&TokenRow::from(&token));
    ctx.success("Logged in; pass the token with --token or FLICKD_TOKEN");
    Ok(())
}
