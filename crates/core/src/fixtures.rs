use crate::models::{Chunk, EmbeddingVector, SourceLocator};
use crate::VectorStore;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread::{self, JoinHandle};

pub(crate) fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![20.into(), 800.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
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
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

pub(crate) fn chunk(text: &str, sequence: u32) -> Chunk {
    Chunk {
        chunk_id: format!("chunk-{sequence}"),
        locator: SourceLocator {
            document_id: "doc-1".to_string(),
            source_path: "/tmp/manual.pdf".to_string(),
            page: 1,
        },
        sequence,
        overlap: 0,
        text: text.to_string(),
    }
}

pub(crate) fn small_store(count: usize, dimensions: usize) -> VectorStore {
    let chunks: Vec<Chunk> = (0..count)
        .map(|index| chunk(&format!("chunk text {index}"), index as u32))
        .collect();
    let vectors: Vec<EmbeddingVector> = (0..count)
        .map(|position| EmbeddingVector {
            position,
            values: (0..dimensions)
                .map(|axis| if axis == position % dimensions { 1.0 } else { 0.1 })
                .collect(),
        })
        .collect();
    VectorStore::build(dimensions, vectors, chunks).expect("fixture store is aligned")
}

/// Answers one request per canned `(status, body)` pair on a loopback port,
/// then stops. Returns the base URL and a handle yielding the request bodies.
pub(crate) fn serve(
    responses: Vec<(u16, String)>,
) -> std::io::Result<(String, JoinHandle<std::io::Result<Vec<String>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let handle = thread::spawn(move || {
        let mut requests = Vec::with_capacity(responses.len());
        for (status, body) in responses {
            let (mut stream, _) = listener.accept()?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 || line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request = vec![0; content_length];
            reader.read_exact(&mut request)?;
            requests.push(String::from_utf8_lossy(&request).into_owned());

            write!(
                stream,
                "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            )?;
            stream.flush()?;
        }
        Ok(requests)
    });
    Ok((base_url, handle))
}
