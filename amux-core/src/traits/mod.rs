pub mod io_plugin;
pub mod pcm_device;
pub mod poller;
