// NOTE / REMINDER: Setting env vars in tests will clobber env vars in other tests. This means that
// each test *must* use a unique prefix for its environment variables to ensure they don't clobber
// other tests (and potentially cause non-deterministic error successes/failures depending on
// concurrent execution order).

use std::{path::Path, time::Duration};

use clap::Parser as _;
use figment::Jail;

use crate::settings::Settings;

const CFG_FILE_CONTENTS: &str = r#"
    workspace = "/config/workspace"
    downloads = "/config/downloads"
    app_version = "41"
    bundle_extension = "hbc"
    bundle_name = "index.hbc"
    download_url = "https://config.example/bundle.zip"
    version_check_url = "https://config.example/version"
    check_interval = 600
"#;

fn make_args(args: &str) -> Result<crate::Args, clap::Error> {
    crate::Args::try_parse_from(str::split_ascii_whitespace(args))
}

fn set_env(jail: &mut Jail, prefix: &str) {
    jail.set_env(format!("{prefix}workspace"), "/env/workspace");
    jail.set_env(format!("{prefix}downloads"), "/env/downloads");
    jail.set_env(format!("{prefix}app_version"), "42");
    jail.set_env(format!("{prefix}check_interval"), "900");
}

#[test]
fn cli_args_override_config_file_and_env_vars() {
    const CLI_ARGS: &str = r#"
    ota-update-agent
        --workspace /args/workspace
        --downloads /args/downloads
        --app-version 43
        --bundle-extension jsbundle
        --bundle-name main.jsbundle
        --download-url https://args.example/bundle.zip
        --version-check-url https://args.example/version
        --check-interval 60
        status
    "#;

    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        set_env(jail, "ota_agent_a_");
        let args = make_args(CLI_ARGS).unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_a_")?;
        assert_eq!(settings.workspace, Path::new("/args/workspace"));
        assert_eq!(settings.downloads, Path::new("/args/downloads"));
        assert_eq!(settings.app_version, "43");
        assert_eq!(settings.bundle_extension, "jsbundle");
        assert_eq!(settings.bundle_name, "main.jsbundle");
        assert_eq!(
            settings.download_url.as_deref(),
            Some("https://args.example/bundle.zip"),
        );
        assert_eq!(
            settings.version_check_url.as_deref(),
            Some("https://args.example/version"),
        );
        assert_eq!(settings.check_interval, Duration::from_secs(60));
        Ok(())
    })
}

#[test]
fn only_setting_config_file_works() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        let args = make_args("ota-update-agent status").unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_b_")?;
        assert_eq!(settings.workspace, Path::new("/config/workspace"));
        assert_eq!(settings.downloads, Path::new("/config/downloads"));
        assert_eq!(settings.app_version, "41");
        assert_eq!(settings.bundle_extension, "hbc");
        assert_eq!(settings.bundle_name, "index.hbc");
        assert_eq!(settings.check_interval, Duration::from_secs(600));
        Ok(())
    })
}

#[test]
fn env_overrides_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        set_env(jail, "ota_agent_c_");
        let args = make_args("ota-update-agent status").unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_c_")?;
        assert_eq!(settings.workspace, Path::new("/env/workspace"));
        assert_eq!(settings.downloads, Path::new("/env/downloads"));
        assert_eq!(settings.app_version, "42");
        // Values absent from the environment fall through to the file.
        assert_eq!(settings.bundle_extension, "hbc");
        assert_eq!(settings.check_interval, Duration::from_secs(900));
        Ok(())
    })
}

#[test]
fn optional_fields_get_defaults() {
    const MINIMAL_CFG: &str = r#"
        workspace = "/config/workspace"
        downloads = "/config/downloads"
        app_version = "41"
    "#;

    Jail::expect_with(|jail| {
        jail.create_file("config.toml", MINIMAL_CFG)?;
        let args = make_args("ota-update-agent status").unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_d_")?;
        assert_eq!(settings.bundle_extension, "jsbundle");
        assert_eq!(settings.bundle_name, "main.jsbundle");
        assert_eq!(settings.download_url, None);
        assert_eq!(settings.version_check_url, None);
        assert_eq!(settings.github_url, None);
        assert_eq!(settings.github_ref, None);
        assert_eq!(settings.check_interval, Duration::from_secs(1800));
        // Nothing to derive from.
        assert_eq!(settings.effective_urls().unwrap(), (None, None));
        Ok(())
    })
}

#[test]
fn github_url_derives_download_and_check_urls() {
    const GITHUB_CFG: &str = r#"
        workspace = "/config/workspace"
        downloads = "/config/downloads"
        app_version = "41"
        github_url = "https://github.com/acme/bundles.git"
        github_ref = "release"
    "#;

    Jail::expect_with(|jail| {
        jail.create_file("config.toml", GITHUB_CFG)?;
        let args = make_args("ota-update-agent status").unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_e_")?;
        let (download, check) = settings.effective_urls().unwrap();
        assert_eq!(
            download.as_deref(),
            Some("https://github.com/acme/bundles/archive/refs/heads/release.zip"),
        );
        assert_eq!(
            check.as_deref(),
            Some("https://raw.githubusercontent.com/acme/bundles/release/ota.version"),
        );
        Ok(())
    })
}

#[test]
fn explicit_urls_win_over_github_derivation() {
    const MIXED_CFG: &str = r#"
        workspace = "/config/workspace"
        downloads = "/config/downloads"
        app_version = "41"
        download_url = "https://cdn.example/bundle.zip"
        github_url = "https://github.com/acme/bundles"
    "#;

    Jail::expect_with(|jail| {
        jail.create_file("config.toml", MIXED_CFG)?;
        let args = make_args("ota-update-agent status").unwrap();
        let settings = Settings::get(&args, "config.toml", "ota_agent_f_")?;
        let (download, check) = settings.effective_urls().unwrap();
        // Per field: the explicit download URL wins, the missing check URL
        // is still derived (default ref, default descriptor path).
        assert_eq!(download.as_deref(), Some("https://cdn.example/bundle.zip"));
        assert_eq!(
            check.as_deref(),
            Some("https://raw.githubusercontent.com/acme/bundles/main/ota.version"),
        );
        Ok(())
    })
}
