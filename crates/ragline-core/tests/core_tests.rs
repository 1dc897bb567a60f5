use std::fs;
use std::io::Write;
use tempfile::TempDir;

use ragline_core::config::{ChunkingSettings, Config};
use ragline_core::loader::DocumentLoader;
use ragline_core::{Error, ErrorKind};

#[test]
fn load_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let chunks = DocumentLoader::default().load(dir).expect("load");

    assert_eq!(chunks.len(), 1, "one small paragraph becomes one chunk");
    assert_eq!(chunks[0].text, "Short text");
    assert_eq!(chunks[0].id, "a.txt:0");
    assert_eq!(chunks[0].source.total_chunks, 1);
}

#[test]
fn chunk_offsets_point_back_into_the_file() {
    let tmp = TempDir::new().unwrap();
    let body = "First paragraph about solar panels.\n\nSecond paragraph about wind.\n\nThird one, on batteries and storage.";
    fs::write(tmp.path().join("energy.md"), body).unwrap();

    let loader = DocumentLoader::new(ChunkingSettings { max_chunk_chars: 40, chunk_overlap_chars: 8 });
    let chunks = loader.load(tmp.path()).expect("load");

    assert!(chunks.len() >= 3);
    for c in &chunks {
        assert!(c.text.chars().count() <= 40);
        assert_eq!(&body[c.source.offset..c.source.offset + c.text.len()], c.text);
        assert_eq!(c.source.total_chunks, chunks.len());
    }
}

#[test]
fn load_limited_two_files_limit_one() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("a.txt"), "alpha bravo").unwrap();
    fs::write(dir.join("b.txt"), "charlie delta").unwrap();

    let chunks = DocumentLoader::default().load_limited(dir, 1).expect("load limited");

    let mut doc_ids = std::collections::HashSet::new();
    for c in &chunks { doc_ids.insert(c.doc_id.clone()); }
    assert_eq!(doc_ids.len(), 1, "limited to one source document");
    assert!(doc_ids.contains("a.txt"), "files are visited in path order");
}

#[test]
fn nested_directories_skip_hidden_and_binary_files() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("notes/2024")).unwrap();
    fs::create_dir_all(dir.join(".git")).unwrap();
    fs::write(dir.join("notes/2024/jan.txt"), "january notes").unwrap();
    fs::write(dir.join(".git/config.txt"), "should be ignored").unwrap();
    fs::write(dir.join("image.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
    fs::write(dir.join("broken.txt"), [0xffu8, 0xfe, 0x00]).unwrap();

    let chunks = DocumentLoader::default().load(dir).expect("load");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].doc_id, "notes/2024/jan.txt");
}

#[test]
fn empty_directory_is_empty_input() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("blank.txt"), "   \n\n  ").unwrap();

    let err = DocumentLoader::default().load(tmp.path()).expect_err("nothing to load");
    assert_eq!(err.kind(), ErrorKind::EmptyInput);
}

#[test]
fn missing_path_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = DocumentLoader::default().load(&tmp.path().join("nope")).expect_err("missing");
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn layered_config_reads_env_specific_file() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[llm]\nmodel_name = \"gpt-4\"\n").unwrap();
    fs::write(tmp.path().join("config.test.toml"), "[retrieval]\ntop_k = 4\n").unwrap();

    let config = Config::layered(tmp.path(), "test", "RAGLINE_LAYERED_TEST_").expect("config");
    let settings = config.settings().expect("settings");

    assert_eq!(settings.llm.model_name, "gpt-4");
    assert_eq!(settings.retrieval.top_k, 4);
    assert_eq!(config.get::<usize>("chunking.max_chunk_chars").unwrap(), 1024);
}
