use lopdf::{Document, Object};
use std::fs;

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "input/sample.pdf".to_string());
    let bytes = fs::read(&path).unwrap();
    println!("Read {} bytes", bytes.len());

    match Document::load_mem(&bytes) {
        Ok(doc) => {
            let pages = doc.get_pages();
            println!("Pages: {}", pages.len());
            for (number, id) in pages.iter() {
                if let Ok(Object::Dictionary(dict)) = doc.get_object(*id) {
                    if let Ok(Object::Array(media)) = dict.get(b"MediaBox") {
                        println!("  page {}: MediaBox {:?}", number, media);
                    }
                }
            }
        }
        Err(e) => {
            println!("Error loading: {:?}", e);
        }
    }
}
