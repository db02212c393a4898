use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{get, post, put, web, App, HttpResponse, HttpServer, Responder};
use clap::Parser;
use futures::StreamExt;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use rs_infer_core::engine::ngram::{DEFAULT_ORDER, NGRAM_MODEL_TYPE};
use rs_infer_core::{GenerationConfig, GenerationSession, NGramEngine, ParamOverrides, PromptTemplate, SessionError};

type Session = GenerationSession<NGramEngine>;

/// Command line configuration of the server.
#[derive(Parser, Debug)]
#[command(name = "rs-infer-server", about = "Streams text generation over HTTP")]
struct ServerArgs {
	#[arg(long, default_value = "127.0.0.1")]
	host: String,

	#[arg(short, long, default_value_t = 5000)]
	port: u16,

	/// Corpus (.txt) or compiled model (.bin)
	#[arg(short, long, default_value = "./data/sample.txt")]
	model: PathBuf,

	#[arg(long, default_value = NGRAM_MODEL_TYPE)]
	model_type: String,

	/// N-gram order used when a corpus has to be trained
	#[arg(long, default_value_t = DEFAULT_ORDER)]
	order: usize,

	#[arg(long, default_value_t = 0.8)]
	temperature: f32,

	#[arg(long, default_value_t = 64)]
	max_new_tokens: usize,

	#[arg(long, default_value_t = 40)]
	top_k: i32,

	#[arg(long, default_value_t = 0.95)]
	top_p: f32,

	/// Comma separated stop phrases
	#[arg(long, value_delimiter = ',')]
	stop_words: Vec<String>,

	/// Prompt template, must contain `{prompt}`
	#[arg(long)]
	template: Option<String>,

	/// Load the model before accepting requests
	#[arg(long)]
	load_on_start: bool,
}

impl ServerArgs {
	fn defaults(&self) -> GenerationConfig {
		GenerationConfig {
			stop_words: self.stop_words.clone(),
			temperature: self.temperature,
			max_new_tokens: self.max_new_tokens,
			top_k: self.top_k,
			top_p: self.top_p,
		}
	}
}

/// Body of `POST /v1/generate`: the prompt plus optional parameter overrides.
#[derive(Deserialize)]
struct GenerateRequest {
	prompt: String,
	#[serde(flatten)]
	overrides: ParamOverrides,
}

#[derive(Serialize)]
struct StatusResponse {
	model: String,
	model_type: String,
	busy: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	loaded: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	config: Option<GenerationConfig>,
}

/// Maps a session error to its HTTP status.
fn error_response(err: &SessionError) -> HttpResponse {
	match err {
		SessionError::AlreadyLoaded | SessionError::ModelNotLoaded => HttpResponse::Conflict().body(err.to_string()),
		SessionError::NativeLink(_) => HttpResponse::BadGateway().body(err.to_string()),
		_ => HttpResponse::InternalServerError().body(err.to_string()),
	}
}

#[put("/v1/load")]
async fn put_load(session: web::Data<Session>) -> impl Responder {
	match session.load().await {
		Ok(()) => HttpResponse::Ok().body("Model loaded successfully"),
		Err(e) => error_response(&e),
	}
}

#[put("/v1/dispose")]
async fn put_dispose(session: web::Data<Session>) -> impl Responder {
	match session.dispose().await {
		Ok(()) => HttpResponse::Ok().body("Model disposed"),
		Err(e) => error_response(&e),
	}
}

/// HTTP GET endpoint `/v1/status`
///
/// Answers immediately: while a generation holds the session only the model
/// identity and `busy` are reported.
#[get("/v1/status")]
async fn get_status(session: web::Data<Session>) -> impl Responder {
	let model = session.model_path().display().to_string();
	let model_type = session.model_type().to_owned();
	if session.is_busy() {
		return HttpResponse::Ok().json(StatusResponse { model, model_type, busy: true, loaded: None, config: None });
	}

	HttpResponse::Ok().json(StatusResponse {
		model,
		model_type,
		busy: false,
		loaded: Some(session.is_model_loaded().await),
		config: Some(session.config().await),
	})
}

#[get("/v1/params")]
async fn get_params(session: web::Data<Session>) -> impl Responder {
	HttpResponse::Ok().json(session.config().await)
}

#[put("/v1/params")]
async fn put_params(session: web::Data<Session>, overrides: web::Json<ParamOverrides>) -> impl Responder {
	HttpResponse::Ok().json(session.update_params(&overrides).await)
}

/// HTTP POST endpoint `/v1/generate`
///
/// Streams the generated fragments as a chunked `text/plain` body. When the
/// client disconnects, the body stream is dropped and the generation ends.
#[post("/v1/generate")]
async fn post_generate(session: web::Data<Session>, request: web::Json<GenerateRequest>) -> impl Responder {
	let request = request.into_inner();
	match session.create_completion_stream(&request.prompt, &request.overrides).await {
		Ok(stream) => HttpResponse::Ok()
			.content_type("text/plain; charset=utf-8")
			.streaming(stream.map(|fragment| fragment.map(web::Bytes::from))),
		Err(e) => error_response(&e),
	}
}

/// Main entry point for the server.
///
/// Builds one generation session over the n-gram engine, shares it between
/// workers and starts an Actix-web HTTP server.
///
/// # Notes
/// - Every request goes through the same session, so generations are
///   served one at a time; other generate requests wait their turn.
/// - With `--load-on-start`, a load failure is logged and the server still
///   starts (the model can be loaded later with `PUT /v1/load`).
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let args = ServerArgs::parse();

	let mut session = GenerationSession::new(
		Arc::new(NGramEngine::new(args.order)),
		args.model.clone(),
		args.model_type.clone(),
		args.defaults(),
	);
	if let Some(template) = &args.template {
		let template = PromptTemplate::new(template.as_str())
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
		session = session.with_prompt_template(template);
	}

	if args.load_on_start {
		if let Err(e) = session.load().await {
			warn!("model not loaded at startup: {}", e);
		}
	}

	let session = web::Data::new(session);
	info!("listening on {}:{}", args.host, args.port);

	HttpServer::new(move || {
		let cors = Cors::default()
			.allow_any_origin()
			.allowed_methods(vec!["GET", "PUT", "POST"])
			.allow_any_header();

		App::new()
			.wrap(Logger::default())
			.wrap(cors)
			.app_data(session.clone())
			.service(put_load)
			.service(put_dispose)
			.service(get_status)
			.service(get_params)
			.service(put_params)
			.service(post_generate)
	})
		.bind((args.host.as_str(), args.port))?
		.run()
		.await
}
