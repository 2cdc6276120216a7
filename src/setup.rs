//! Interactive terminal prompts
//!
//! Used by the CLI to answer gateway suspensions and by `dattoham setup`.

use crate::config::{mask_secret, ConfigStore, ConfigUpdate};
use crate::gateway::{CredentialRequest, ProviderSwitch};
use crate::recovery::{setup_instructions, ProviderChoice};
use std::io::{self, BufRead, Write};

const API_KEY_URL: &str = "https://aistudio.google.com/app/apikey";

fn read_line(prompt: &str) -> Result<String, String> {
    print!("{}", prompt);
    io::stdout().flush().map_err(|e| e.to_string())?;
    let mut input = String::new();
    io::stdin()
        .lock()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim().to_string())
}

/// Turn a menu answer into a choice. Blank or `q` dismisses.
fn parse_choice(input: &str) -> Option<ProviderChoice> {
    match input.trim().to_lowercase().as_str() {
        "1" | "c" | "cloud" => Some(ProviderChoice::SwitchToCloud),
        "2" | "s" | "setup" => Some(ProviderChoice::ShowSetupInstructions),
        "3" | "q" | "" => Some(ProviderChoice::Dismiss),
        _ => None,
    }
}

/// Ask whether to move to the cloud backend after the local one failed
pub fn prompt_provider_choice(switch: &ProviderSwitch) -> Result<ProviderChoice, String> {
    tracing::debug!(request_id = %switch.request_id(), "waiting for provider choice");
    eprintln!();
    eprintln!("  ! {}", switch.error());
    eprintln!();
    for (i, choice) in switch.choices().iter().enumerate() {
        eprintln!("    [{}] {}", i + 1, choice.label());
    }
    eprintln!();

    loop {
        let input = read_line("  Enter your choice [1/2/3]: ")?;
        match parse_choice(&input) {
            Some(choice) => return Ok(choice),
            None => eprintln!("  Please enter 1, 2, or 3."),
        }
    }
}

/// Ask for a cloud API key. `None` means the user declined.
pub fn prompt_credential(request: &CredentialRequest) -> Result<Option<String>, String> {
    tracing::debug!(request_id = %request.request_id(), "waiting for API key");
    eprintln!();
    if request.was_rejected() {
        eprintln!("  ! {}", request.error());
        eprintln!("  The stored key has been removed.");
    } else {
        eprintln!("  The cloud backend needs a Gemini API key.");
    }
    eprintln!("  Create one at: {}", API_KEY_URL);
    eprintln!();
    read_key()
}

fn read_key() -> Result<Option<String>, String> {
    let key = read_line("  API Key (leave blank to cancel): ")?;
    if key.is_empty() {
        return Ok(None);
    }
    if !key.starts_with("AIza") {
        eprintln!("  Warning: this doesn't look like a Gemini key (they start with AIza)");
        let confirm = read_line("  Use it anyway? [y/N]: ")?;
        if confirm.to_lowercase() != "y" {
            return Ok(None);
        }
    }
    Ok(Some(key))
}

pub fn print_setup_instructions() {
    eprintln!();
    for line in setup_instructions().lines() {
        eprintln!("  {}", line);
    }
    eprintln!();
}

/// `dattoham setup`: store a cloud API key. Returns false if skipped.
pub fn run_setup(store: &ConfigStore) -> Result<bool, String> {
    let current = store.get();
    println!();
    println!("  ─────────────────────────────────────────────────────────────────");
    println!("  Cloud backend setup");
    println!("  ─────────────────────────────────────────────────────────────────");
    println!();
    println!("  Current key: {}", mask_secret(current.cloud_api_key.as_deref()));
    println!("  1. Go to: {}", API_KEY_URL);
    println!("  2. Create an API key");
    println!("  3. Paste it below");
    println!();

    let Some(key) = read_key()? else {
        println!();
        println!("  No key saved. Run 'dattoham setup' to try again.");
        return Ok(false);
    };

    store
        .update(ConfigUpdate::default().cloud_api_key(key))
        .map_err(|e| e.to_string())?;

    println!();
    println!("  ✓ API key saved to the {}", store.credentials_label());
    println!("  ✓ Config location: {}", ConfigStore::config_location());
    println!();
    Ok(true)
}
