use anyhow::Result;
use pretty_assertions::assert_eq;

use rlvm_core::format::test_util::{build_container, ScenarioBuilder};
use rlvm_core::{Error, LoaderConfig};
use rlvm_nls::Encoding;

fn image(body: &[u8]) -> Vec<u8> {
    ScenarioBuilder::new(body).build()
}

fn first_text(archive: &rlvm_core::Archive, number: u16) -> Result<Option<String>> {
    let scenario = archive.scenario(number)?.expect("scenario in toc");
    Ok(scenario.iter().find_map(|i| i.text()))
}

#[test]
fn open_with_overrides() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path();
    let mut broken = image(b"Broken");
    broken.truncate(0x30);
    std::fs::write(
        dir.join("SEEN.TXT"),
        build_container(&[(1, image(b"Old")), (2, broken)]),
    )?;
    std::fs::write(dir.join("seen0001.TXT"), image(b"New"))?;
    std::fs::write(dir.join("Seen0003.txt"), image(b"Extra"))?;
    std::fs::write(dir.join("seen_notes.txt"), b"not a scenario")?;
    std::fs::write(dir.join("loader.toml"), "seen = \"SEEN.TXT\"\nencoding = \"cp949\"\n")?;

    let config = LoaderConfig::load(dir.join("loader.toml"))?;
    let archive = config.open_archive()?;

    assert_eq!(archive.scenario_numbers().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(first_text(&archive, 1)?.as_deref(), Some("New"));
    assert_eq!(first_text(&archive, 3)?.as_deref(), Some("Extra"));
    assert_eq!(config.encoding_for(&archive), Encoding::Euckr);
    Ok(())
}

#[test]
fn failures_stay_with_their_scenario() -> Result<()> {
    let mut broken = image(b"Broken");
    broken.truncate(0x30);
    let mut huge_cast = image(b"Cast");
    huge_cast[0x18..0x1c].copy_from_slice(&u32::MAX.to_le_bytes());
    let mut nested = b"#\x01\x0a\x05\x00\x01\x00\x00(".to_vec();
    nested.extend(std::iter::repeat(b'(').take(200_000));

    let data = build_container(&[
        (10, broken),
        (11, image(b"Fine")),
        (12, huge_cast),
        (13, image(&nested)),
    ]);
    let archive = rlvm_core::Archive::from_bytes(data.into(), b"")?;

    for _ in 0..2 {
        match archive.scenario(10) {
            Err(Error::CorruptScenario { scenario, .. }) => assert_eq!(scenario, Some(10)),
            other => panic!("expected a corrupt scenario, got {:?}", other.map(|s| s.is_some())),
        }
    }
    assert!(matches!(
        archive.scenario(12),
        Err(Error::CorruptScenario {
            scenario: Some(12),
            ..
        })
    ));
    assert!(matches!(
        archive.scenario(13),
        Err(Error::MalformedExpression {
            scenario: Some(13),
            ..
        })
    ));
    assert_eq!(first_text(&archive, 11)?.as_deref(), Some("Fine"));
    assert!(archive.scenario(14)?.is_none());
    assert_eq!(archive.probable_encoding(), Encoding::Sjis);
    Ok(())
}

#[test]
fn missing_container() {
    let config = LoaderConfig::new("/nonexistent/SEEN.TXT");
    assert!(matches!(config.open_archive(), Err(Error::Io(_))));
}
