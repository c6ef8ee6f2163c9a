//! Shared fixtures for pipeline integration tests: generated PDFs served by
//! a mock HTTP server, plus a throwaway database and text directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use manualforge_core::{BatchResult, CancellationToken, Pipeline, ProgressReporter};
use manualforge_shared::{PipelineConfig, Record, RecordState, RunId, Stage};
use manualforge_storage::{ContentStore, FsContentStore, Storage};

fn text_stream(text: &str) -> Stream {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    Stream::new(dictionary! {}, content.encode().unwrap())
}

/// Build a PDF with one text line per page.
pub fn build_pdf(pages: &[String]) -> Vec<u8> {
    build_pdf_from_streams(pages.iter().map(|text| text_stream(text)).collect())
}

/// Build a PDF with one content stream per page.
pub fn build_pdf_from_streams(streams: Vec<Stream>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for stream in streams {
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// A manual of `extent` pages: a cover, body pages carrying boilerplate, a back page.
pub fn manual_pdf(id: i64, extent: usize) -> Vec<u8> {
    let pages: Vec<String> = (1..=extent)
        .map(|n| {
            if n == 1 {
                format!("Cover of manual {id}")
            } else if n == extent {
                format!("Back of manual {id}")
            } else {
                format!("Step {n} of manual {id} AUTODOC")
            }
        })
        .collect();
    build_pdf(&pages)
}

/// A 4-page manual whose first body page is compressed garbage.
pub fn unreadable_manual_pdf(id: i64) -> Vec<u8> {
    build_pdf_from_streams(vec![
        text_stream(&format!("Cover of manual {id}")),
        Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            b"not a deflate stream".to_vec(),
        ),
        text_stream(&format!("Step 3 of manual {id}")),
        text_stream(&format!("Back of manual {id}")),
    ])
}

/// How a mock record's document behaves.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// A well-formed manual with this many pages.
    Pages(usize),
    /// 404 from the server.
    Missing,
    /// 200 with bytes that are not a PDF.
    Garbage,
    /// A valid PDF with a body page whose content cannot be decoded.
    Unreadable,
}

/// Temp database + text dir + mock server with one document per record.
pub struct Fixture {
    pub dir: PathBuf,
    pub server: MockServer,
    pub storage: Arc<Storage>,
    pub content: Arc<FsContentStore>,
}

impl Fixture {
    pub async fn new(sources: &[(i64, Source)]) -> Self {
        let dir = std::env::temp_dir().join(format!("mf_pipeline_{}", uuid::Uuid::now_v7()));
        let server = MockServer::start().await;
        let storage = Arc::new(Storage::open(&dir.join("manuals.db")).await.unwrap());
        let content = Arc::new(FsContentStore::new(dir.join("text")));

        let mut records = Vec::new();
        for (id, source) in sources {
            let doc_path = format!("/manuals/{id}.pdf");
            match source {
                Source::Pages(extent) => {
                    Mock::given(method("GET"))
                        .and(path(doc_path.as_str()))
                        .respond_with(
                            ResponseTemplate::new(200).set_body_bytes(manual_pdf(*id, *extent)),
                        )
                        .mount(&server)
                        .await;
                }
                Source::Garbage => {
                    Mock::given(method("GET"))
                        .and(path(doc_path.as_str()))
                        .respond_with(
                            ResponseTemplate::new(200).set_body_bytes(b"<html>oops</html>".to_vec()),
                        )
                        .mount(&server)
                        .await;
                }
                Source::Unreadable => {
                    Mock::given(method("GET"))
                        .and(path(doc_path.as_str()))
                        .respond_with(
                            ResponseTemplate::new(200).set_body_bytes(unreadable_manual_pdf(*id)),
                        )
                        .mount(&server)
                        .await;
                }
                Source::Missing => {
                    Mock::given(method("GET"))
                        .and(path(doc_path.as_str()))
                        .respond_with(ResponseTemplate::new(404))
                        .mount(&server)
                        .await;
                }
            }
            records.push(
                Record::new(
                    *id,
                    format!("Manual {id} (E{id})"),
                    format!("{}{doc_path}", server.uri()),
                )
                .unwrap(),
            );
        }
        storage.insert_new_records(&records).await.unwrap();

        Self {
            dir,
            server,
            storage,
            content,
        }
    }

    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline<Storage> {
        let content: Arc<dyn ContentStore> = self.content.clone();
        Pipeline::new(self.storage.clone(), content, config).unwrap()
    }

    pub async fn run(&self, config: PipelineConfig) -> BatchResult {
        self.pipeline(config)
            .run_batch(&CancellationToken::new(), Arc::new(manualforge_core::SilentProgress))
            .await
            .unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Pipeline settings for tests: mock server on localhost, fast retries.
pub fn test_config(pool_size: usize) -> PipelineConfig {
    PipelineConfig {
        pool_size,
        allow_private_hosts: true,
        retry_backoff_ms: 1,
        ..PipelineConfig::default()
    }
}

/// The canonical mixed batch: 5 good manuals, 2 too short, 3 unreachable.
pub fn mixed_batch() -> Vec<(i64, Source)> {
    let mut sources = Vec::new();
    for id in 1..=5 {
        sources.push((id, Source::Pages(5)));
    }
    for id in 6..=7 {
        sources.push((id, Source::Pages(2)));
    }
    for id in 8..=10 {
        sources.push((id, Source::Missing));
    }
    sources
}

/// Progress reporter that records every event.
#[derive(Default)]
pub struct RecordingProgress {
    pub stages: Mutex<Vec<(i64, Stage)>>,
    pub settled: Mutex<Vec<(i64, RecordState)>>,
    pub total: Mutex<Option<usize>>,
    pub finished: Mutex<bool>,
    /// Cancel this token as soon as the first record settles.
    pub cancel_after_first: Option<CancellationToken>,
}

impl RecordingProgress {
    pub fn stages_for(&self, id: i64) -> Vec<Stage> {
        self.stages
            .lock()
            .unwrap()
            .iter()
            .filter(|(rid, _)| *rid == id)
            .map(|(_, stage)| *stage)
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn batch_started(&self, _run_id: &RunId, total: usize) {
        *self.total.lock().unwrap() = Some(total);
    }

    fn stage(&self, id: i64, stage: Stage) {
        self.stages.lock().unwrap().push((id, stage));
    }

    fn record_settled(&self, id: i64, state: RecordState) {
        self.settled.lock().unwrap().push((id, state));
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
    }

    fn done(&self, _result: &BatchResult) {
        *self.finished.lock().unwrap() = true;
    }
}
