use drawchat_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::config_profiles::{
    normalize_text_option, CliProfile, CliProfilesConfig, ACCESS_TOKEN_ENV,
};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            endpoint,
            user_id,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            endpoint,
            user_id,
            no_activate,
        ),
        ConfigCommands::Show { profile } => run_config_show(profile.as_deref().or(global_profile)),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    endpoint: Option<String>,
    user_id: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    if let Some(value) = normalize_text_option(endpoint) {
        profile.endpoint = Some(value);
    }
    if let Some(value) = normalize_text_option(user_id) {
        profile.user_id = Some(value);
    }
    validate_profile(profile)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profiles
        .get(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing_fields = missing_profile_fields(profile);
    if missing_fields.is_empty() {
        println!("Sync profile '{profile_name}' is ready. Set {ACCESS_TOKEN_ENV} and run `drawchat sync`.");
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

pub fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let active = config.active_profile.as_deref() == Some(profile_name.as_str());
    println!(
        "Profile: {profile_name}{}",
        if active { " (active)" } else { "" }
    );
    println!(
        "Endpoint: {}",
        profile.endpoint().unwrap_or_else(|| "<unset>".to_string())
    );
    println!(
        "User: {}",
        profile.user_id().unwrap_or_else(|| "<unset>".to_string())
    );
    let token_state = if std::env::var(ACCESS_TOKEN_ENV).is_ok_and(|value| !value.trim().is_empty()) {
        "set"
    } else {
        "unset"
    };
    println!("Access token ({ACCESS_TOKEN_ENV}): {token_state}");
    Ok(())
}

pub fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(endpoint) = profile.endpoint() {
        if !is_http_url(&endpoint) {
            return Err(CliError::Config(
                "endpoint must include http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn missing_profile_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing_fields = Vec::new();
    if profile.endpoint().is_none() {
        missing_fields.push("endpoint");
    }
    if profile.user_id().is_none() {
        missing_fields.push("user_id");
    }
    missing_fields
}
