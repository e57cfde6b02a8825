mod common;

use common::{assistant, embedder, generator, open_store};
use docchat::{AssistantConfig, Error, chunking::ChunkingConfig};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn small_chunks() -> AssistantConfig {
    AssistantConfig {
        chunking: ChunkingConfig {
            chunk_size: 20,
            overlap: 5,
        },
        ..AssistantConfig::default()
    }
}

#[tokio::test]
async fn reopened_store_has_identical_chunks() -> TestResult {
    let dir = tempfile::tempdir()?;
    let text = "Ünïcödé text — with “quotes”, tabs\tand\nnewlines survives.";

    let before = {
        let assistant = assistant(
            dir.path(),
            embedder(),
            generator(&[], &[]),
            small_chunks(),
        )?;
        assistant.ingest("first.txt", text).await?;
        assistant.ingest("second.txt", "another document").await?;
        assistant
            .store()
            .read(|idx| idx.corpus.all().to_vec())?
    };

    let reopened = open_store(dir.path())?;
    let after = reopened.read(|idx| idx.corpus.all().to_vec())?;

    assert_eq!(before, after);
    for (i, chunk) in after.iter().enumerate() {
        assert_eq!(chunk.position, i);
    }
    let stats = reopened.stats()?;
    assert_eq!(stats.total_chunks, before.len());
    assert!(stats.lexical_index_ready);
    Ok(())
}

#[tokio::test]
async fn missing_vector_artifact_refuses_to_open() -> TestResult {
    let dir = tempfile::tempdir()?;
    {
        let assistant = assistant(
            dir.path(),
            embedder(),
            generator(&[], &[]),
            small_chunks(),
        )?;
        assistant.ingest("doc.txt", "some words to keep").await?;
    }

    std::fs::remove_file(dir.path().join("vectors.bin"))?;

    match open_store(dir.path()) {
        Err(Error::IndexMisalignment { corpus, vectors }) => {
            assert_eq!(corpus, 1);
            assert_eq!(vectors, 0);
        }
        other => panic!("expected misalignment, got {other:?}"),
    }
    Ok(())
}
