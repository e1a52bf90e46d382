use crate::api::{OAuthCredentials, Runtime};
use crate::commands::Out;
use crate::config::ConfigSummary;
use crate::{utils, Config, Result};

/// Handles `reaper config`: prints the configuration. In the local runtime the client id and
/// secret are looked up as `reaper auth` would and shown masked.
pub async fn show_config(config: &Config, runtime: Runtime) -> Result<Out<ConfigSummary>> {
    let summary = config.summary();
    let (client_id, client_secret) = match runtime {
        Runtime::Local => match OAuthCredentials::load_local(&config.client_secret_path()).await {
            Ok(c) => (utils::mask(c.client_id()), utils::mask(c.client_secret())),
            Err(_) => (utils::mask(""), utils::mask("")),
        },
        Runtime::Serverless => (
            format!("secret '{}'", summary.secrets.client_id),
            format!("secret '{}'", summary.secrets.client_secret),
        ),
    };

    let message = format!(
        "Configuration ({runtime} runtime)\n\
        home:                 {}\n\
        intake sheet:         {}\n\
        columns:              folder_url={}, deletion_date={}, em_notification_date={}, deletion_status={}\n\
        timezone:             {}\n\
        redirect uri:         {}\n\
        scopes:               {}\n\
        token file:           {}\n\
        client secret file:   {}\n\
        client id:            {client_id}\n\
        client secret:        {client_secret}\n\
        access token secret:  {}\n\
        refresh token secret: {}",
        summary.home.display(),
        summary.intake_sheet_url,
        summary.columns.folder_url,
        summary.columns.deletion_date,
        summary.columns.em_notification_date,
        summary.columns.deletion_status,
        summary.timezone,
        summary.redirect_uri,
        summary.scopes.join(" "),
        summary.token_path.display(),
        summary.client_secret_path.display(),
        summary.secrets.access_token,
        summary.secrets.refresh_token,
    );
    Ok(Out::new(message, summary))
}
