#![allow(missing_docs)]

use tessera::storage::record::{NodeRecord, PropValue, PropertyRecord};
use tessera::storage::{StoreOptions, Stores};
use tessera::types::{LabelId, NodeId, PropId, RecordId, Result, TesseraError};

fn open_stores(dir: &std::path::Path) -> Result<Stores> {
    Stores::open(dir, &StoreOptions::default())
}

#[test]
fn fixed_records_roundtrip_unchanged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;

    let mut written = Vec::new();
    for i in 0..64u32 {
        let id = stores.nodes().allocate()?;
        let record = NodeRecord::with_labels(id, &[LabelId(i % 7), LabelId(i % 3 + 10)]);
        stores.nodes().put(&record)?;
        written.push(record);
    }
    for record in &written {
        assert_eq!(&stores.nodes().get(record.id)?, record);
    }
    Ok(())
}

#[test]
fn get_beyond_high_water_mark_is_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let id = stores.properties().allocate()?;
    stores.properties().put(&PropertyRecord::new(
        id,
        NodeId(1),
        PropId(8),
        PropValue::Int(42),
    ))?;
    assert!(matches!(
        stores.properties().get(RecordId(1_000_000)),
        Err(TesseraError::NotFound)
    ));
    Ok(())
}

#[test]
fn freeing_a_live_record_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = open_stores(dir.path())?;
    let id = stores.nodes().allocate()?;
    let record = NodeRecord::with_labels(id, &[LabelId(2)]);
    stores.nodes().put(&record)?;
    assert!(matches!(
        stores.nodes().free(id),
        Err(TesseraError::Invalid(_))
    ));
    stores.nodes().put(&NodeRecord::unused(id))?;
    stores.nodes().free(id)?;
    // the freed id is handed out again
    assert_eq!(stores.nodes().allocate()?, id);
    Ok(())
}

#[test]
fn records_survive_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let id;
    {
        let stores = open_stores(dir.path())?;
        id = stores.nodes().allocate()?;
        stores
            .nodes()
            .put(&NodeRecord::with_labels(id, &[LabelId(4), LabelId(9)]))?;
        stores.sync()?;
    }
    let stores = open_stores(dir.path())?;
    let record = stores.nodes().get(id)?;
    assert_eq!(record.labels.as_slice(), &[LabelId(4), LabelId(9)]);
    // allocator was rebuilt past the existing record
    assert!(stores.nodes().allocate()?.0 > id.0);
    Ok(())
}

#[test]
fn structurally_invalid_slot_surfaces_as_corruption() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let id;
    {
        let stores = open_stores(dir.path())?;
        id = stores.nodes().allocate()?;
        stores.nodes().put(&NodeRecord::with_labels(id, &[LabelId(1)]))?;
        stores.sync()?;
    }
    // slot 0 lives at the start of the first data page
    let path = dir.path().join("nodes.store");
    let contents = std::fs::read(&path)?;
    let mut mangled = contents.clone();
    mangled[8192] = 0xFF; // in-use bit plus unknown flag bits
    std::fs::write(&path, mangled)?;

    let stores = open_stores(dir.path());
    match stores {
        // corruption may already surface during the open-time id rebuild scan
        Err(TesseraError::Corruption(_)) => Ok(()),
        Ok(stores) => {
            assert!(matches!(
                stores.nodes().get(id),
                Err(TesseraError::Corruption(_))
            ));
            Ok(())
        }
        Err(other) => panic!("unexpected error: {other:?}"),
    }
}
