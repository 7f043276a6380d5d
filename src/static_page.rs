use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid regex"));
static SCRIPT_SELF_CLOSING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b[^>]*/>").expect("valid regex"));
static NOSCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript>(.*?)</noscript>").expect("valid regex"));

/// Derive the script-stripped preview variant: the original site's JS is
/// removed (it is broken without its backend anyway), `<noscript>` content is
/// shown, and a generic interaction shim is injected before `</body>`.
pub fn build_static_variant(html: &str) -> String {
    let stripped = SCRIPT_BLOCK.replace_all(html, "");
    let stripped = SCRIPT_SELF_CLOSING.replace_all(&stripped, "");
    let stripped = NOSCRIPT_BLOCK.replace_all(&stripped, "$1");

    let shim = build_interaction_shim();
    if stripped.contains("</body>") {
        stripped.replacen("</body>", &format!("{shim}</body>"), 1)
    } else {
        format!("{stripped}{shim}")
    }
}

/// Heuristic UI wiring rules, applied in order. Each runs in its own
/// try/catch so one rule's DOM-query failure cannot abort the others; an
/// unmatched pattern is a silent no-op. This is best-effort cosmetics over
/// common UI conventions, not derived from the original page's logic.
const INTERACTION_RULES: &[(&str, &str)] = &[
    (
        "drawer-toggle",
        r#"
    var drawerCheckbox = document.querySelector('#Drawer__checkbox, [class*="drawer"] input[type="checkbox"]');
    var drawerNav = document.querySelector('nav.Drawer__container, nav[class*="Drawer"]');
    if (drawerCheckbox && drawerNav) {
      var closedTransform = drawerNav.style.transform || 'translate3d(100%, 0px, 0px)';
      var overlay = document.querySelector('.Drawer__overlay');
      var toggleDrawer = function () {
        drawerCheckbox.checked = !drawerCheckbox.checked;
        drawerNav.style.transform = drawerCheckbox.checked ? 'translate3d(0, 0, 0)' : closedTransform;
        if (overlay) {
          overlay.style.display = drawerCheckbox.checked ? 'block' : 'none';
          overlay.style.opacity = drawerCheckbox.checked ? '1' : '0';
        }
      };
      window.__clonerToggleDrawer = toggleDrawer;
      document.querySelectorAll('[class*="cart-btn"], [class*="cart-icon"], button[class*="cursor-pointer"]').forEach(function (btn) {
        var rect = btn.getBoundingClientRect();
        if (rect.top < 100) {
          btn.style.cursor = 'pointer';
          btn.addEventListener('click', function (e) { e.preventDefault(); e.stopPropagation(); toggleDrawer(); });
        }
      });
      var closeBtn = drawerNav.querySelector('button');
      if (closeBtn) {
        closeBtn.addEventListener('click', function (e) { e.preventDefault(); e.stopPropagation(); if (drawerCheckbox.checked) toggleDrawer(); });
      }
      if (overlay) {
        overlay.addEventListener('click', function () { if (drawerCheckbox.checked) toggleDrawer(); });
      }
    }
"#,
    ),
    (
        "quantity-stepper",
        r#"
    var minusBtns = document.querySelectorAll('button[aria-label="minusButton"], button[aria-label*="ecrease"]');
    var plusBtns = document.querySelectorAll('button[aria-label="plusButton"], button[aria-label*="ncrease"]');
    minusBtns.forEach(function (minusBtn, index) {
      var plusBtn = plusBtns[index];
      if (!plusBtn) return;
      var display = minusBtn.parentElement && minusBtn.parentElement.querySelector('span, div:not(button)');
      var qty = parseInt(display && display.textContent || '1', 10) || 1;
      [minusBtn, plusBtn].forEach(function (b) {
        b.removeAttribute('disabled');
        b.style.cursor = 'pointer';
        b.style.opacity = '1';
      });
      minusBtn.addEventListener('click', function (e) {
        e.preventDefault(); e.stopPropagation();
        if (qty > 1) { qty--; if (display) display.textContent = qty; }
      });
      plusBtn.addEventListener('click', function (e) {
        e.preventDefault(); e.stopPropagation();
        qty++; if (display) display.textContent = qty;
      });
    });
"#,
    ),
    (
        "bundle-selector",
        r#"
    var bundleButtons = Array.prototype.filter.call(document.querySelectorAll('button'), function (b) {
      return /\b(get\s+\d|save\s+\d+%|bundle)\b/i.test(b.textContent || '');
    });
    if (bundleButtons.length > 1) {
      var selectBundle = function (selected) {
        bundleButtons.forEach(function (btn) {
          if (btn === selected) {
            btn.style.border = '2px solid #10b981';
            btn.setAttribute('data-selected', 'true');
          } else {
            btn.style.border = '';
            btn.removeAttribute('data-selected');
          }
        });
      };
      selectBundle(bundleButtons[0]);
      bundleButtons.forEach(function (btn) {
        btn.style.cursor = 'pointer';
        btn.addEventListener('click', function (e) { e.preventDefault(); selectBundle(btn); });
      });
    }
"#,
    ),
    (
        "add-to-cart",
        r#"
    Array.prototype.filter.call(document.querySelectorAll('button'), function (b) {
      return /add to cart/i.test(b.textContent || '');
    }).forEach(function (btn) {
      btn.style.cursor = 'pointer';
      btn.addEventListener('click', function (e) {
        e.preventDefault();
        if (window.__clonerToggleDrawer) window.__clonerToggleDrawer();
        var original = btn.textContent;
        btn.textContent = 'Added!';
        setTimeout(function () { btn.textContent = original; }, 1500);
      });
    });
"#,
    ),
    (
        "hamburger-menu",
        r#"
    var trigger = document.querySelector('[class*="hamburger"], [class*="menu-btn"], [aria-label*="menu"], .burger');
    var navMenu = document.querySelector('[class*="mobile-nav"], [class*="slide-menu"], [class*="nav-drawer"], [class*="sidebar"]:not(.Drawer)');
    if (trigger) {
      trigger.style.cursor = 'pointer';
      trigger.addEventListener('click', function (e) {
        e.preventDefault(); e.stopPropagation();
        if (!navMenu) return;
        var hidden = navMenu.style.display === 'none' || navMenu.classList.contains('hidden');
        if (hidden) {
          navMenu.classList.remove('hidden');
          navMenu.style.display = 'block';
          if ((navMenu.style.transform || '').indexOf('translate') !== -1) {
            navMenu.style.transform = 'translate3d(0, 0, 0)';
          }
        } else {
          navMenu.style.display = 'none';
        }
      });
    }
"#,
    ),
    (
        "nav-dropdowns",
        r#"
    document.querySelectorAll('nav li, ul.menu li').forEach(function (li) {
      var submenu = li.querySelector('ul, [class*="submenu"], [class*="dropdown"]');
      if (!submenu) return;
      li.addEventListener('mouseenter', function () {
        submenu.classList.remove('hidden', 'invisible', 'opacity-0');
        submenu.style.display = 'block';
      });
      li.addEventListener('mouseleave', function () {
        submenu.classList.add('hidden');
        submenu.style.display = '';
      });
    });
"#,
    ),
    (
        "combobox-toggle",
        r#"
    document.querySelectorAll('[role="combobox"]').forEach(function (box) {
      box.style.cursor = 'pointer';
      box.addEventListener('click', function () {
        var open = box.getAttribute('data-state') === 'open';
        box.setAttribute('data-state', open ? 'closed' : 'open');
        box.setAttribute('aria-expanded', String(!open));
      });
    });
"#,
    ),
    (
        "cursor-pointer",
        r#"
    document.querySelectorAll('button, [role="button"], [class*="cursor-pointer"]').forEach(function (el) {
      el.style.cursor = 'pointer';
    });
"#,
    ),
];

fn build_interaction_shim() -> String {
    let mut script = String::from("\n<script data-cloner-ui=\"interaction-shim\">\n(function() {\n'use strict';\n");
    for (name, body) in INTERACTION_RULES {
        script.push_str(&format!("  // rule: {name}\n  try {{{body}  }} catch (err) {{}}\n"));
    }
    script.push_str("})();\n</script>");
    script
}
