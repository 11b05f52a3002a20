use std::collections::HashSet;

use crate::campaign::CampaignConfig;

/// Internal validation, called automatically by `CampaignConfig::from_str` / `load`.
pub(crate) fn validate(config: &CampaignConfig) -> anyhow::Result<()> {
    if config.runtime.eval_parallelism == 0 {
        anyhow::bail!("runtime.eval_parallelism must be > 0");
    }

    if config.walk.unit.as_duration().is_zero() {
        anyhow::bail!("walk.unit must be > 0");
    }

    // vars keys must be template identifiers: [A-Za-z_][A-Za-z0-9_]*
    for key in config.vars.keys() {
        if !is_valid_var_name(key) {
            anyhow::bail!(
                "vars: invalid variable name {:?}, must match [A-Za-z_][A-Za-z0-9_]*",
                key,
            );
        }
    }

    let mut names = HashSet::with_capacity(config.drips.len());
    for drip in &config.drips {
        if drip.name.trim().is_empty() {
            anyhow::bail!("drip name must not be empty");
        }
        if !names.insert(drip.name.as_str()) {
            anyhow::bail!("duplicate drip name: {:?}", drip.name);
        }
        if drip.event_time_field.is_empty() || drip.subject_field.is_empty() {
            anyhow::bail!(
                "drip {:?}: event_time_field and subject_field must not be empty",
                drip.name,
            );
        }
        if !config.stores.contains_key(&drip.store) {
            anyhow::bail!(
                "drip {:?}: store {:?} is not configured (known: {:?})",
                drip.name,
                drip.store,
                config.stores.keys().collect::<Vec<_>>(),
            );
        }
        if drip
            .repeat_after
            .is_some_and(|d| d.as_duration().is_zero())
        {
            anyhow::bail!("drip {:?}: repeat_after must be > 0", drip.name);
        }
    }

    Ok(())
}

/// A valid variable name starts with ASCII letter or underscore, followed by
/// ASCII alphanumerics or underscores.
pub(crate) fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.bytes();
    match chars.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    chars.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
