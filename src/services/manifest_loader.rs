//! Manifest loading and validation.
//!
//! Validation is total: a manifest that loads is safe to build and start.
//! Every failure names the offending image or service and happens before
//! any side effect.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::dependency_resolver::{DependencyGraph, DependencyResolver};
use crate::domain::errors::ManifestError;
use crate::domain::models::{
    is_valid_volume_name, HealthCheck, HealthCheckDefinition, ImageRef, ImageSpec, Manifest,
    ManifestDocument, SeedSpec, ServiceDefinition, ServiceRole, ServiceSpec, VolumeBinding,
    MODULE_ENV_CONTRACT,
};

/// Parses and validates orchestration manifests
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader {
    resolver: DependencyResolver,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate the manifest at `path`.
    ///
    /// Relative paths inside it resolve against the manifest's directory.
    pub fn load_path(&self, path: &Path) -> Result<Manifest, ManifestError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Parse(format!("{}: {e}", path.display())))?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.parse(&text, base_dir)
    }

    /// Parse and validate manifest text.
    pub fn parse(&self, text: &str, base_dir: &Path) -> Result<Manifest, ManifestError> {
        let document: ManifestDocument =
            serde_yaml::from_str(text).map_err(|e| ManifestError::Parse(e.to_string()))?;
        self.validate(document, base_dir)
    }

    /// Validate a parsed document into a [`Manifest`].
    pub fn validate(&self, document: ManifestDocument, base_dir: &Path) -> Result<Manifest, ManifestError> {
        let base_dir = std::path::absolute(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

        let external_images = document
            .external_images
            .iter()
            .map(|r| ImageRef::parse(r))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let images = self.validate_images(&document, &external_images, &base_dir)?;
        let declared_images: BTreeSet<&ImageRef> = images.iter().map(|i| &i.reference).collect();
        let services = self.validate_services(&document.services, |r| {
            declared_images.contains(r) || external_images.contains(r)
        })?;

        validate_roles(&services)?;
        let seed = validate_seed(&document, &services, &base_dir)?;

        debug!(
            images = images.len(),
            services = services.len(),
            external = external_images.len(),
            "manifest validated"
        );

        Ok(Manifest {
            base_dir,
            external_images,
            images,
            services,
            seed,
        })
    }

    fn validate_images(
        &self,
        document: &ManifestDocument,
        external: &BTreeSet<ImageRef>,
        base_dir: &Path,
    ) -> Result<Vec<ImageSpec>, ManifestError> {
        let mut images = Vec::with_capacity(document.images.len());
        let mut seen = HashSet::new();

        for def in &document.images {
            if def.name.trim().is_empty() {
                return Err(ManifestError::EmptyName { kind: "image" });
            }
            let reference = ImageRef::parse(&format!("{}:{}", def.name, def.tag))?;
            if reference.name != def.name {
                return Err(ManifestError::InvalidImageRef(def.name.clone()));
            }
            if !seen.insert(reference.clone()) || external.contains(&reference) {
                return Err(ManifestError::DuplicateName {
                    kind: "image",
                    name: reference.to_string(),
                });
            }

            if let Some(step) = def.steps.iter().position(Vec::is_empty) {
                return Err(ManifestError::EmptyBuildStep {
                    image: reference.to_string(),
                    step: step + 1,
                });
            }

            let parent = def.parent.as_deref().map(ImageRef::parse).transpose()?;

            images.push(ImageSpec {
                reference,
                context: resolve(base_dir, &def.context),
                parent,
                steps: def.steps.clone(),
            });
        }

        for image in &images {
            if let Some(parent) = &image.parent {
                if !seen.contains(parent) && !external.contains(parent) {
                    return Err(ManifestError::UnresolvedParent {
                        image: image.reference.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
        }

        let graph: DependencyGraph = images
            .iter()
            .map(|i| {
                (
                    i.reference.to_string(),
                    i.parent.iter().map(ToString::to_string).collect(),
                )
            })
            .collect();
        if let Some(cycle) = self.resolver.detect_cycle(&graph) {
            return Err(ManifestError::ImageCycle(cycle));
        }

        Ok(images)
    }

    fn validate_services(
        &self,
        definitions: &[ServiceDefinition],
        image_resolves: impl Fn(&ImageRef) -> bool,
    ) -> Result<Vec<ServiceSpec>, ManifestError> {
        let mut names = HashSet::new();
        for def in definitions {
            if def.name.trim().is_empty() {
                return Err(ManifestError::EmptyName { kind: "service" });
            }
            if !names.insert(def.name.as_str()) {
                return Err(ManifestError::DuplicateName {
                    kind: "service",
                    name: def.name.clone(),
                });
            }
        }

        let mut services = Vec::with_capacity(definitions.len());
        for def in definitions {
            let image = ImageRef::parse(&def.image)?;
            if !image_resolves(&image) {
                return Err(ManifestError::UnresolvedImage {
                    service: def.name.clone(),
                    image: image.to_string(),
                });
            }

            for dependency in &def.depends_on {
                if !names.contains(dependency.as_str()) {
                    return Err(ManifestError::UnknownDependency {
                        service: def.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if matches!(&def.command, Some(argv) if argv.is_empty()) {
                return Err(ManifestError::EmptyCommand {
                    service: def.name.clone(),
                });
            }

            let healthcheck = def
                .healthcheck
                .as_ref()
                .map(|hc| validate_healthcheck(&def.name, hc))
                .transpose()?;

            let mut depends_on = Vec::new();
            for dependency in &def.depends_on {
                if !depends_on.contains(dependency) {
                    depends_on.push(dependency.clone());
                }
            }

            services.push(ServiceSpec {
                name: def.name.clone(),
                image,
                role: def.role,
                command: def.command.clone(),
                depends_on,
                environment: def.environment.clone(),
                healthcheck,
                volumes: validate_volumes(def)?,
            });
        }

        let graph: DependencyGraph = services
            .iter()
            .map(|s| (s.name.clone(), s.depends_on.clone()))
            .collect();
        if let Some(cycle) = self.resolver.detect_cycle(&graph) {
            return Err(ManifestError::ServiceCycle(cycle));
        }

        Ok(services)
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn validate_healthcheck(service: &str, hc: &HealthCheckDefinition) -> Result<HealthCheck, ManifestError> {
    let invalid = |reason: &str| ManifestError::InvalidHealthCheck {
        service: service.to_string(),
        reason: reason.to_string(),
    };

    if hc.test.is_empty() || hc.test[0].trim().is_empty() {
        return Err(invalid("test command cannot be empty"));
    }
    if hc.retries == 0 {
        return Err(invalid("retries must be at least 1"));
    }
    if hc.interval_ms == 0 {
        return Err(invalid("interval_ms must be greater than 0"));
    }
    if hc.timeout_ms == 0 {
        return Err(invalid("timeout_ms must be greater than 0"));
    }

    Ok(HealthCheck {
        test: hc.test.clone(),
        interval: Duration::from_millis(hc.interval_ms),
        timeout: Duration::from_millis(hc.timeout_ms),
        retries: hc.retries,
    })
}

fn validate_volumes(def: &ServiceDefinition) -> Result<Vec<VolumeBinding>, ManifestError> {
    let mut bindings: Vec<VolumeBinding> = Vec::with_capacity(def.volumes.len());

    for volume in &def.volumes {
        let invalid = |reason: &str| ManifestError::InvalidVolume {
            service: def.name.clone(),
            volume: volume.name.clone(),
            reason: reason.to_string(),
        };

        if !is_valid_volume_name(&volume.name) {
            return Err(invalid("names may only contain letters, digits, '-', '_' and '.'"));
        }
        if bindings.iter().any(|b| b.name == volume.name) {
            return Err(invalid("bound more than once"));
        }

        let target = match &volume.target {
            Some(target) if target.trim().is_empty() => {
                return Err(invalid("target cannot be empty"));
            }
            Some(target) => target.clone(),
            None => VolumeBinding::default_target(&volume.name),
        };
        if bindings.iter().any(|b| b.target == target) {
            return Err(invalid("target already used by another binding"));
        }

        bindings.push(VolumeBinding {
            name: volume.name.clone(),
            target,
        });
    }

    Ok(bindings)
}

/// At most one store and one module; the module honours the env contract.
fn validate_roles(services: &[ServiceSpec]) -> Result<(), ManifestError> {
    let mut seen: BTreeMap<&'static str, &str> = BTreeMap::new();

    for service in services {
        if service.role == ServiceRole::Service {
            continue;
        }
        let role = service.role.as_str();
        if let Some(first) = seen.insert(role, &service.name) {
            return Err(ManifestError::DuplicateRole {
                role,
                first: first.to_string(),
                second: service.name.clone(),
            });
        }

        if service.role == ServiceRole::Module {
            if service.command.is_none() {
                return Err(ManifestError::ModuleContract {
                    service: service.name.clone(),
                    reason: "a module must declare a command".to_string(),
                });
            }
            for key in MODULE_ENV_CONTRACT {
                let present = service
                    .environment
                    .get(key)
                    .is_some_and(|v| !v.trim().is_empty());
                if !present {
                    return Err(ManifestError::ModuleContract {
                        service: service.name.clone(),
                        reason: format!("environment must provide {key}"),
                    });
                }
            }
        }
    }

    Ok(())
}

fn validate_seed(
    document: &ManifestDocument,
    services: &[ServiceSpec],
    base_dir: &Path,
) -> Result<Option<SeedSpec>, ManifestError> {
    let Some(seed) = &document.seed else {
        return Ok(None);
    };

    let store = services
        .iter()
        .find(|s| s.name == seed.store)
        .ok_or_else(|| ManifestError::InvalidSeed(format!("store '{}' is not a declared service", seed.store)))?;

    if store.role != ServiceRole::Store {
        return Err(ManifestError::InvalidSeed(format!(
            "service '{}' must have role 'store'",
            store.name
        )));
    }
    if store.volumes.is_empty() {
        return Err(ManifestError::InvalidSeed(format!(
            "store '{}' must bind a volume to hold its data",
            store.name
        )));
    }
    if seed.version.as_deref().is_some_and(|v| v.trim().is_empty()) {
        return Err(ManifestError::InvalidSeed("version cannot be empty".to_string()));
    }

    Ok(Some(SeedSpec {
        store: seed.store.clone(),
        dataset: resolve(base_dir, &seed.dataset),
        version: seed.version.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r"
external_images: [python:3.11-slim]
images:
  - { name: base, tag: '1', context: ./base, parent: 'python:3.11-slim' }
  - { name: app, context: ./app, parent: 'base:1' }
services:
  - name: database
    image: base:1
    role: store
    volumes: [{ name: pgdata }]
    healthcheck: { test: [keel, store, ping], interval_ms: 10, timeout_ms: 100, retries: 3 }
  - name: analysis
    image: app
    role: module
    depends_on: [database]
    command: [keel, module, avg-measure]
    environment: { STORE_HOST: database, STORE_NAME: beers, STORE_USER: app, STORE_PASSWORD: secret }
seed: { store: database, dataset: ./data/beers.csv, version: '1' }
";

    fn parse(text: &str) -> Result<Manifest, ManifestError> {
        ManifestLoader::new().parse(text, Path::new("/project"))
    }

    #[test]
    fn test_valid_manifest_loads() {
        let manifest = parse(VALID).unwrap();

        assert_eq!(manifest.images.len(), 2);
        assert_eq!(manifest.images[1].reference, ImageRef::new("app", "latest"));
        assert_eq!(manifest.images[0].context, PathBuf::from("/project/./base"));
        assert_eq!(manifest.store().unwrap().name, "database");
        assert_eq!(manifest.module().unwrap().name, "analysis");
        assert_eq!(
            manifest.store().unwrap().volumes[0].target,
            "KEEL_VOLUME_PGDATA"
        );
        assert_eq!(manifest.seed.unwrap().dataset, PathBuf::from("/project/./data/beers.csv"));
    }

    #[test]
    fn test_service_cycle_names_path() {
        let err = parse(
            r"
external_images: [busybox]
services:
  - { name: a, image: busybox, depends_on: [b] }
  - { name: b, image: busybox, depends_on: [a] }
",
        )
        .unwrap_err();

        assert_eq!(
            err,
            ManifestError::ServiceCycle(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn test_image_cycle_rejected() {
        let err = parse(
            r"
images:
  - { name: a, context: ., parent: 'b:latest' }
  - { name: b, context: ., parent: 'a:latest' }
",
        )
        .unwrap_err();

        assert!(matches!(err, ManifestError::ImageCycle(_)));
    }

    #[test]
    fn test_unresolved_image_rejected() {
        let err = parse("services: [{ name: web, image: 'nginx:1' }]").unwrap_err();
        assert_eq!(
            err,
            ManifestError::UnresolvedImage {
                service: "web".into(),
                image: "nginx:1".into()
            }
        );
    }

    #[test]
    fn test_unresolved_parent_rejected() {
        let err = parse("images: [{ name: app, context: ., parent: 'missing:2' }]").unwrap_err();
        assert!(matches!(err, ManifestError::UnresolvedParent { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = parse(
            "external_images: [busybox]\nservices: [{ name: web, image: busybox, depends_on: [db] }]",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownDependency { .. }));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = parse(
            r"
external_images: [busybox]
services:
  - { name: db, image: busybox, healthcheck: { test: ['true'], retries: 0 } }
",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidHealthCheck { .. }));
    }

    #[test]
    fn test_module_contract_enforced() {
        let text = VALID.replace("STORE_PASSWORD: secret", "OTHER: x");
        let err = parse(&text).unwrap_err();

        match err {
            ManifestError::ModuleContract { service, reason } => {
                assert_eq!(service, "analysis");
                assert!(reason.contains("STORE_PASSWORD"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let err = parse(
            r"
external_images: [busybox]
services:
  - { name: a, image: busybox, role: store }
  - { name: b, image: busybox, role: store }
",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateRole { role: "store", .. }));
    }

    #[test]
    fn test_seed_store_needs_volume() {
        let err = parse(
            r"
external_images: [busybox]
services: [{ name: db, image: busybox, role: store }]
seed: { store: db, dataset: data.csv }
",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidSeed(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse("servics: []").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }
}
