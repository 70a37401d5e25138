use prompt_autopilot::config::{CompiledRule, LoadedConfig, Pattern, RuleTrigger, UploadKind};

/// One-line summary of a rule: trigger, flags and actions.
pub fn describe_rule(rule: &CompiledRule) -> String {
    let trigger = match &rule.trigger {
        RuleTrigger::Pattern(Pattern::Literal(text)) => format!("{text:?}"),
        RuleTrigger::Pattern(Pattern::Regex(regex)) => format!("/{}/", regex.as_str()),
        RuleTrigger::DiffTimeout(duration) => format!("timeout:{:?}", duration),
    };

    let mut flags = Vec::new();
    if rule.once {
        flags.push("once");
    }
    if rule.upload {
        flags.push("upload");
    }
    if !rule.exclusive {
        flags.push("non-exclusive");
    }

    let actions = rule
        .actions
        .iter()
        .map(|action| action.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut line = format!("{} -> [{}]", trigger, actions);
    if !flags.is_empty() {
        line.push_str(&format!(" ({})", flags.join(", ")));
    }
    if rule.pattern().map(Pattern::as_str) != Some(rule.label.as_str()) {
        line.push_str(&format!(" label={:?}", rule.label));
    }
    line
}

/// Print the loaded configuration for the `show` command.
pub fn print_config(config: &LoadedConfig) {
    let settings = &config.settings;
    println!("Loaded {} rules", config.rules.len());

    println!("\nSession:");
    println!("  command: {}", config.launch.display());
    println!("  mode: {:?}", config.launch.mode);
    println!("  size: {}x{}", config.launch.cols, config.launch.rows);
    println!("  grace_period: {:?}", settings.grace_period);
    println!("  key_delay: {:?}", settings.key_delay);
    println!("  strip_ansi: {}", settings.strip_ansi);
    if let Some(timeout) = settings.prompt_timeout {
        println!("  prompt_timeout: {:?} ({:?})", timeout, settings.on_timeout);
    }

    println!("\nUpload:");
    match config.upload.kind {
        UploadKind::File => println!("  file: {}", config.upload.resolved_dir().display()),
        UploadKind::None => println!("  disabled"),
    }
    println!("  timeout: {:?}", settings.upload_timeout);

    if !config.rules.is_empty() {
        println!("\nRules:");
        for rule in &config.rules {
            println!("  {}: {}", rule.id, describe_rule(rule));
        }
    }
}
