use solo_definitions::LocalConfig;

use crate::app::App;
use crate::resolvers;
use crate::settings::flags;
use super::Result;

/// `solo init`
///
/// Provision the home directory layout and seed the per-user state file.
/// Re-running against an existing home is safe; the email flag updates the
/// stored identity.
pub fn run(app: &App) -> Result<()> {
    crate::init()?;

    let exists = LocalConfig::config_file_exists(&app.home);
    let email_flag = app.settings.get(flags::USER_EMAIL);

    if !exists {
        let email = match email_flag {
            Some(e) => e,
            None => {
                if resolvers::is_interactive(&app.settings) {
                    resolvers::prompt("Enter your email address")?
                } else {
                    bail!("user-email is required on first init");
                }
            }
        };
        let config = LocalConfig::create(&email, env!("CARGO_PKG_VERSION"))?;
        config.save(&app.home)?;
        let mut local = app.local.lock().unwrap();
        *local = config;
        info!("initialized {}", app.home.join("local-config.yaml").display());
        return Ok(());
    }

    app.update_local(|local| {
        if let Some(email) = email_flag {
            local.set_user_email_address(&email)?;
        }
        local.set_solo_version(env!("CARGO_PKG_VERSION"))
    })?;
    info!("solo home {} is ready", app.home.display());
    Ok(())
}
