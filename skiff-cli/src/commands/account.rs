//! Account command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use skiff_core::domain::account::CloudAccount;
use skiff_core::domain::provider::ProviderKind;

use crate::config::Config;

/// Account subcommands
#[derive(Subcommand)]
pub enum AccountCommands {
    /// Store cloud credentials under a name
    Create {
        /// Account name, referenced by provisioning requests
        #[arg(short, long)]
        name: String,

        /// Provider (digitalocean, aws, fake)
        #[arg(short, long)]
        provider: ProviderKind,

        /// Credential (can be specified multiple times: -c accessToken=...)
        #[arg(short, long = "credential", value_parser = parse_key_val)]
        credentials: Vec<(String, String)>,
    },
    /// Show an account (credentials are redacted)
    Get {
        /// Account name
        name: String,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_account_command(command: AccountCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AccountCommands::Create {
            name,
            provider,
            credentials,
        } => {
            let account = CloudAccount {
                name,
                provider,
                credentials: credentials.into_iter().collect(),
            };
            let stored = client.create_account(&account).await?;

            println!("{}", "✓ Account stored".green().bold());
            print_account(&stored);
            Ok(())
        }
        AccountCommands::Get { name } => {
            let account = client.get_account(&name).await?;
            print_account(&account);
            Ok(())
        }
    }
}

fn print_account(account: &CloudAccount) {
    println!("  Name:     {}", account.name.cyan());
    println!("  Provider: {}", account.provider);
    for (key, value) in &account.credentials {
        println!("  {} = {}", key.dimmed(), value.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("accessToken=a=b").unwrap(),
            ("accessToken".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("accessToken").is_err());
    }
}
