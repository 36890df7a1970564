use std::io::Write;
use std::sync::Arc;
use stockchat::groq::GroqClient;
use stockchat::models::{RenderContent, UiEvent};
use stockchat::orchestrator::ChatSession;
use tokio::io::AsyncBufReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    dotenv::dotenv().ok();

    println!("Stock chat — ask about prices, charts, news, or heatmaps.");
    println!("Type \"exit\" (or Ctrl-D) to quit.\n");

    let model = Arc::new(GroqClient::from_env());
    let mut session = ChatSession::new(model);

    let (ui_tx, mut ui_rx) = tokio::sync::mpsc::unbounded_channel();
    // The printer reports each finished turn so the prompt never interleaves
    // with late output.
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let printer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::TextDelta { delta, .. } => {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
                UiEvent::TextSealed { .. } => println!(),
                UiEvent::Placeholder { .. } => println!("[rendering widget…]"),
                UiEvent::Final(unit) => {
                    match unit.content {
                        RenderContent::Widget {
                            widget,
                            symbol,
                            caption,
                        } => {
                            match symbol {
                                Some(symbol) => println!("[{} {}]", widget.name(), symbol),
                                None => println!("[{}]", widget.name()),
                            }
                            if !caption.is_empty() {
                                println!("{}", caption);
                            }
                        }
                        RenderContent::Error {
                            message,
                            support_url,
                        } => {
                            println!("Error: {}", message);
                            println!("If you think something has gone wrong, open an issue: {}", support_url);
                        }
                        // Text was already streamed delta by delta.
                        RenderContent::Text { .. } => {}
                    }
                    let _ = done_tx.send(());
                }
            }
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match session.submit(&line, &ui_tx).await {
            // Every accepted submission ends with one Final event; wait for
            // the printer to flush it.
            Ok(_) => {
                let _ = done_rx.recv().await;
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    drop(ui_tx);
    let _ = printer.await;
    println!("bye");

    Ok(())
}
