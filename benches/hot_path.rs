use std::convert::Infallible;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use llmapi::pipeline::{run_pipeline, StreamCallbacks};
use llmapi::protocol::gemini::response_decoder::GeminiStreamAdapter;
use llmapi::protocol::gemini::GeminiResponse;
use llmapi::protocol::openai_chat::response_decoder::OpenAiStreamAdapter;
use llmapi::protocol::openai_chat::OpenAiStreamChunk;
use llmapi::stream::reasoning::{
    extract_reasoning_from_full_text, markers_from_names, DEFAULT_REASONING_MARKER,
};
use llmapi::stream::{
    ChunkDecoder, DeltaAccumulator, EventStreamDecoder, JsonArrayDecoder, ReasoningExtractor,
    SseEnvelope,
};

const FRAMES: usize = 256;

fn openai_sse_body() -> Vec<u8> {
    let mut out = String::new();
    for idx in 0..FRAMES {
        let content = match idx {
            0 => "<think>".to_string(),
            10 => "</think>".to_string(),
            _ => format!("token-{idx} "),
        };
        let chunk = serde_json::json!({
            "id": "chatcmpl-bench",
            "object": "chat.completion.chunk",
            "created": 1_727_000_000_u64,
            "model": "bench",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        });
        out.push_str("data: ");
        out.push_str(&chunk.to_string());
        out.push_str("\n\n");
    }
    out.push_str("data: [DONE]\n\n");
    out.into_bytes()
}

fn gemini_array_body() -> Vec<u8> {
    let items: Vec<String> = (0..FRAMES)
        .map(|idx| {
            serde_json::json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
                {"text": format!("token-{idx} ")}
            ]}}]})
            .to_string()
        })
        .collect();
    format!("[{}]", items.join(",\n")).into_bytes()
}

/// One element carrying a 1 MiB text part, delivered over a thousand reads.
fn large_element_body() -> Vec<u8> {
    let item = serde_json::json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
        {"text": "y".repeat(1 << 20)}
    ]}}]});
    format!("[{item}]").into_bytes()
}

/// Re-chunk `body` into network-sized reads.
fn body_stream(
    body: &[u8],
    read_size: usize,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send {
    let pieces: Vec<Result<Bytes, Infallible>> = body
        .chunks(read_size)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect();
    futures_util::stream::iter(pieces)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("bench runtime")
}

fn bench_decoders(c: &mut Criterion) {
    let rt = runtime();
    let sse = openai_sse_body();
    let array = gemini_array_body();

    c.bench_function("sse_decode_openai_256", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut decoder = EventStreamDecoder::<_, SseEnvelope<OpenAiStreamChunk>>::new(
                    body_stream(black_box(&sse), 1024),
                );
                let mut count = 0usize;
                while let Ok(Some(chunk)) = decoder.next().await {
                    black_box(&chunk);
                    count += 1;
                }
                count
            })
        });
    });

    c.bench_function("json_array_decode_gemini_256", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut decoder =
                    JsonArrayDecoder::<_, GeminiResponse>::new(body_stream(black_box(&array), 1024));
                let mut count = 0usize;
                while let Ok(Some(chunk)) = decoder.next().await {
                    black_box(&chunk);
                    count += 1;
                }
                count
            })
        });
    });

    let large = large_element_body();
    c.bench_function("json_array_decode_1mib_element", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut decoder =
                    JsonArrayDecoder::<_, GeminiResponse>::new(body_stream(black_box(&large), 1024));
                let mut count = 0usize;
                while let Ok(Some(chunk)) = decoder.next().await {
                    black_box(&chunk);
                    count += 1;
                }
                count
            })
        });
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = runtime();
    let sse = openai_sse_body();
    let array = gemini_array_body();
    let markers = markers_from_names(&[DEFAULT_REASONING_MARKER]);

    c.bench_function("pipeline_openai_sse_with_markers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut decoder = EventStreamDecoder::new(body_stream(black_box(&sse), 1024));
                let mut adapter = OpenAiStreamAdapter;
                let accumulator =
                    DeltaAccumulator::new("bench").with_reasoning_markers(markers.clone());
                run_pipeline(
                    &mut decoder,
                    &mut adapter,
                    accumulator,
                    &StreamCallbacks::default(),
                )
                .await
                .expect("pipeline")
            })
        });
    });

    c.bench_function("pipeline_gemini_array", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut decoder = JsonArrayDecoder::new(body_stream(black_box(&array), 1024));
                let mut adapter = GeminiStreamAdapter::new();
                run_pipeline(
                    &mut decoder,
                    &mut adapter,
                    DeltaAccumulator::new("bench"),
                    &StreamCallbacks::default(),
                )
                .await
                .expect("pipeline")
            })
        });
    });
}

fn bench_reasoning_extractor(c: &mut Criterion) {
    let markers = markers_from_names(&[DEFAULT_REASONING_MARKER]);
    let mut text = String::from("<think>");
    for idx in 0..512 {
        text.push_str(&format!("step {idx} < not a tag; "));
    }
    text.push_str("</think>");
    for idx in 0..512 {
        text.push_str(&format!("answer {idx} "));
    }

    // Small pieces so tags straddle chunk boundaries.
    let pieces: Vec<&str> = {
        let mut out = Vec::new();
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let mut cut = rest.len().min(5);
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (head, tail) = rest.split_at(cut);
            out.push(head);
            rest = tail;
        }
        out
    };

    c.bench_function("reasoning_extract_streaming_5b_chunks", |b| {
        b.iter(|| {
            let mut extractor = ReasoningExtractor::new(markers.clone());
            let mut visible = 0usize;
            for piece in &pieces {
                visible += extractor.push(black_box(piece)).visible.len();
            }
            visible + extractor.finish().visible.len()
        });
    });

    c.bench_function("reasoning_extract_full_text", |b| {
        b.iter(|| black_box(extract_reasoning_from_full_text(black_box(&text), &markers)));
    });
}

criterion_group!(
    benches,
    bench_decoders,
    bench_pipeline,
    bench_reasoning_extractor
);
criterion_main!(benches);
