mod common;
mod test_appconfigreporter;
mod test_controller;
mod test_deploysource;
mod test_plugin_service;
mod test_stageplan;
mod test_stores;
