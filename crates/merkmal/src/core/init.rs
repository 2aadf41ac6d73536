//! Dispatcher construction from configuration.
//!
//! Replaces ad-hoc setup panics with a fallible constructor: anything wrong
//! with the configuration (unreadable signature file, bad regex) surfaces
//! as a typed error before the service starts.

use crate::actions::{
    ActionChecksum, ActionClamav, ActionExternal, ActionFfprobe, ActionIdentify, ActionSignature,
    ActionTika, ActionXml, Capabilities,
};
use crate::core::config::MerkmalConfig;
use crate::core::dispatcher::ActionDispatcher;
use crate::error::{MerkmalError, Result};
use crate::mapper::FileMapper;
use std::sync::Arc;
use std::time::Duration;

/// Build a dispatcher with every enabled action registered.
pub fn build_dispatcher(config: &MerkmalConfig, mapper: Arc<FileMapper>) -> Result<ActionDispatcher> {
    let mut dispatcher = ActionDispatcher::new(&config.mime_relevance)?;

    if config.signature.enabled {
        let data = std::fs::read(&config.signature.signature_file).map_err(|e| {
            MerkmalError::validation_with_source(
                format!(
                    "cannot read signature file '{}'",
                    config.signature.signature_file
                ),
                e,
            )
        })?;
        dispatcher.register(Arc::new(ActionSignature::new(
            "siegfried",
            &data,
            config.signature.mime_map.clone(),
        )?));
        tracing::info!("indexer action siegfried added");
    }

    if config.xml.enabled {
        dispatcher.register(Arc::new(ActionXml::new("xml", config.xml.format.clone())));
        tracing::info!("indexer action xml added");
    }

    if config.checksum.enabled {
        dispatcher.register(Arc::new(ActionChecksum::new(
            config.checksum.name.clone(),
            config.checksum.digest.clone(),
        )));
        tracing::info!("indexer action {} added", config.checksum.name);
    }

    if config.ffprobe.enabled {
        dispatcher.register(Arc::new(ActionFfprobe::new(
            "ffprobe",
            config.ffprobe.ffprobe.clone(),
            Duration::from_secs(config.ffprobe.timeout),
            config.ffprobe.online,
            config.ffprobe.mime.clone(),
        )));
        tracing::info!("indexer action ffprobe added");
    }

    if config.identify.enabled {
        dispatcher.register(Arc::new(ActionIdentify::new(
            "identify",
            config.identify.convert.clone(),
            Duration::from_secs(config.identify.timeout),
            config.identify.online,
            config.identify.mime_map.clone(),
        )?));
        tracing::info!("indexer action identify added");
    }

    if config.tika.enabled {
        let timeout = Duration::from_secs(config.tika.timeout);
        dispatcher.register(Arc::new(ActionTika::new(
            "tika",
            config.tika.address_meta.clone(),
            timeout,
            &config.tika.regexp_mime_meta,
            &config.tika.regexp_mime_meta_not,
            None,
            config.tika.online,
            config.insecure_cert,
        )?));
        tracing::info!("indexer action tika added");

        dispatcher.register(Arc::new(ActionTika::new(
            "fulltext",
            config.tika.address_fulltext.clone(),
            timeout,
            &config.tika.regexp_mime_fulltext,
            &config.tika.regexp_mime_fulltext_not,
            Some(config.tika.content_field.clone()),
            config.tika.online,
            config.insecure_cert,
        )?));
        tracing::info!("indexer action fulltext added");
    }

    if config.clamav.enabled {
        dispatcher.register(Arc::new(ActionClamav::new(
            config.clamav.clamscan.clone(),
            Duration::from_secs(config.clamav.timeout),
            Arc::clone(&mapper),
        )));
        tracing::info!("indexer action clamav added");
    }

    for external in &config.external {
        if external.name.is_empty() {
            return Err(MerkmalError::validation("external action without a name"));
        }
        let capability = external
            .capabilities
            .iter()
            .fold(Capabilities::NONE, |acc, c| acc | *c);
        dispatcher.register(Arc::new(ActionExternal::new(
            external.name.clone(),
            external.address.clone(),
            capability,
            external.call_type,
            &external.mimetype,
            Duration::from_secs(external.timeout),
            Arc::clone(&mapper),
            config.insecure_cert,
        )?));
        tracing::info!("indexer action {} added", external.name);
    }

    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_registers_checksum_only() {
        let config = MerkmalConfig::default();
        let dispatcher = build_dispatcher(&config, Arc::new(FileMapper::default())).unwrap();
        assert_eq!(dispatcher.names(), vec!["checksum".to_string()]);
    }

    #[test]
    fn test_missing_signature_file_fails_construction() {
        let mut config = MerkmalConfig::default();
        config.signature.enabled = true;
        config.signature.signature_file = "/nonexistent/signatures.json".to_string();
        assert!(build_dispatcher(&config, Arc::new(FileMapper::default())).is_err());
    }

    #[test]
    fn test_full_stack_registration() {
        let mut sigfile = tempfile::NamedTempFile::new().unwrap();
        sigfile.write_all(b"[]").unwrap();

        let mut config = MerkmalConfig::default();
        config.signature.enabled = true;
        config.signature.signature_file = sigfile.path().to_string_lossy().to_string();
        config.xml.enabled = true;
        config.ffprobe.enabled = true;
        config.identify.enabled = true;
        config.tika.enabled = true;
        config.clamav.enabled = true;
        config.external.push(crate::core::config::ExternalActionConfig {
            name: "mediaserver".to_string(),
            address: "http://localhost:8088/[[PATH]]".to_string(),
            ..Default::default()
        });

        let dispatcher = build_dispatcher(&config, Arc::new(FileMapper::default())).unwrap();
        let names = dispatcher.names();
        for expected in [
            "checksum",
            "clamav",
            "ffprobe",
            "fulltext",
            "identify",
            "mediaserver",
            "siegfried",
            "tika",
            "xml",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        // stream-capable subset excludes the file- and url-only probes
        let streamable = dispatcher.names_by_caps(Capabilities::STREAM);
        assert!(!streamable.contains(&"clamav".to_string()));
        assert!(!streamable.contains(&"mediaserver".to_string()));
        assert!(streamable.contains(&"siegfried".to_string()));
    }
}
