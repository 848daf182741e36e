#![allow(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessera::storage::{StoreOptions, Stores};
use tessera::types::{LabelId, PropId, Result, TesseraError};

fn open_stores(dir: &std::path::Path) -> Result<Stores> {
    Stores::open(dir, &StoreOptions::default())
}

#[test]
fn create_resolve_lookup_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let id = stores.labels().create("Person")?;
    assert_eq!(stores.labels().name(id)?, Some("Person".to_string()));
    assert_eq!(stores.labels().id_by_name("Person"), Some(id));
    assert_eq!(stores.labels().id_by_name("Absent"), None);
    Ok(())
}

#[test]
fn long_names_span_multiple_blocks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let long_name: String = "N".repeat(500);
    let id = stores.property_keys().create(&long_name)?;
    assert_eq!(stores.property_keys().name(id)?, Some(long_name.clone()));
    assert_eq!(stores.property_keys().id_by_name(&long_name), Some(id));
    Ok(())
}

#[test]
fn internal_token_resolves_to_sentinel_not_notfound() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let internal = stores.labels().create_internal()?;
    assert_eq!(stores.labels().name(internal)?, None);
    // a token that was never created is a miss, not a sentinel
    assert!(matches!(
        stores.labels().name(LabelId(999)),
        Err(TesseraError::NotFound)
    ));
    Ok(())
}

#[test]
fn token_id_spaces_are_independent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let label = stores.labels().create("Person")?;
    let key = stores.property_keys().create("name")?;
    assert_eq!(label, LabelId(0));
    assert_eq!(key, PropId(0));
    Ok(())
}

#[test]
fn cache_is_rebuilt_on_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut names = Vec::new();
    {
        let stores = open_stores(dir.path())?;
        for _ in 0..40 {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .map(char::from)
                .take(24)
                .collect();
            let id = stores.relationship_types().create(&name)?;
            names.push((name, id));
        }
        stores.sync()?;
    }
    let stores = open_stores(dir.path())?;
    for (name, id) in &names {
        assert_eq!(stores.relationship_types().name(*id)?, Some(name.clone()));
        assert_eq!(stores.relationship_types().id_by_name(name), Some(*id));
    }
    Ok(())
}

#[test]
fn duplicate_names_are_the_callers_problem() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let first = stores.labels().create("Dup")?;
    let second = stores.labels().create("Dup")?;
    assert_ne!(first, second);
    // both resolve; the reverse map points at one of them
    assert_eq!(stores.labels().name(first)?, Some("Dup".to_string()));
    assert_eq!(stores.labels().name(second)?, Some("Dup".to_string()));
    assert!(stores.labels().id_by_name("Dup").is_some());
    Ok(())
}
