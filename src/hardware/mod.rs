pub mod bt_module;
pub mod gpio_keys;
pub mod gpio_led;
pub mod ntc;
pub mod pwm_heater;
pub mod soft_rtc;
pub mod traits;
