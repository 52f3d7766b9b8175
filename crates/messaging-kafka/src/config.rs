use courier_messaging::{Error as MessagingError, MessagingConfig, ScramAlgorithm};
use rdkafka::config::ClientConfig;

/// Client id sent to the brokers: the host name when known, else the app name.
#[must_use]
pub fn client_id(config: &MessagingConfig) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| config.app_name.clone())
}

const fn security_protocol(credentials: bool, tls: bool) -> &'static str {
    match (credentials, tls) {
        (true, true) => "SASL_SSL",
        (true, false) => "SASL_PLAINTEXT",
        (false, true) => "SSL",
        (false, false) => "PLAINTEXT",
    }
}

const fn sasl_mechanism(algorithm: ScramAlgorithm) -> &'static str {
    match algorithm {
        ScramAlgorithm::Sha256 => "SCRAM-SHA-256",
        ScramAlgorithm::Sha512 => "SCRAM-SHA-512",
    }
}

/// Builds the librdkafka settings shared by producers, admin clients and consumers.
///
/// # Errors
///
/// Returns [`MessagingError::ConfigInvalid`] if the config does not validate
/// or a user name is given without a SCRAM algorithm.
pub fn client_config(config: &MessagingConfig) -> Result<ClientConfig, MessagingError> {
    config.validate()?;

    let credentials = config.has_credentials();
    let tls = config.uses_tls();

    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.server_list().join(","));
    client_config.set("client.id", client_id(config));
    client_config.set("security.protocol", security_protocol(credentials, tls));

    if credentials {
        let algorithm = config.algorithm.ok_or_else(|| {
            MessagingError::ConfigInvalid(
                "a SCRAM algorithm (sha256 or sha512) is required with a user name".to_string(),
            )
        })?;

        client_config.set("sasl.mechanism", sasl_mechanism(algorithm));
        client_config.set("sasl.username", config.username.clone().unwrap_or_default());
        client_config.set("sasl.password", config.password.clone().unwrap_or_default());
    }

    if let Some(ca_file) = &config.ca_file {
        client_config.set("ssl.ca.location", ca_file.display().to_string());
    }

    if let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) {
        client_config.set("ssl.certificate.location", cert_file.display().to_string());
        client_config.set("ssl.key.location", key_file.display().to_string());
    }

    if tls && config.tls_skip_verify {
        client_config.set("enable.ssl.certificate.verification", "false");
    }

    Ok(client_config)
}
