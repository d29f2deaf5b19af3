pub mod display;
pub mod http;
pub mod media;
pub mod mpv;
pub mod orchestrator;
pub mod player;
pub mod reconcile;
pub mod remote;
pub mod remote_http;
pub mod resolver;
pub mod stager;
pub mod supervisor;
pub mod validity;
pub mod viewer;
